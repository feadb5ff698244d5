//! Flowline edge station
//!
//! Runs on the factory floor next to the PLCs: bridges raw counter reads
//! into hourly production buckets, originates material-movement orders,
//! and keeps a durable outbox between bus reconnects. Counterpart of
//! core-server on the other side of the orders/dispatch topics.

pub mod core;
pub mod db;
pub mod engine;
pub mod messaging;

pub use self::core::config::Config;
pub use self::engine::Engine;
