//! Edge-side messaging: the heartbeater and the dispatch-topic handler.
//!
//! The outbox drainer and ingestor themselves live in `shared`; this
//! module wires them to edge concerns.

mod edge_handler;
mod heartbeat;

pub use edge_handler::EdgeHandler;
pub use heartbeat::{ActiveOrderCountFn, Heartbeater};
