//! Flowline core coordinator
//!
//! Central counterpart of the edge stations: registers edges, tracks
//! their liveness, turns order requests into fleet work, polls the fleet
//! manager for state transitions, and streams lifecycle updates back on
//! the dispatch topic. Hosts the message broker the edges connect to.

pub mod core;
pub mod db;
pub mod dispatch;
pub mod fleet;
pub mod message;
pub mod messaging;

pub use self::core::config::Config;
