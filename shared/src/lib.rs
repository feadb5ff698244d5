//! Shared types for the Flowline platform
//!
//! Common building blocks used by both edge-server and core-server:
//! the wire protocol (envelope, typed payloads, two-phase ingestor),
//! the message-bus client abstraction with its transports, the durable
//! outbox contract and drainer, and the unified error system.

pub mod bus;
pub mod error;
pub mod outbox;
pub mod protocol;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use error::{AppError, AppResult, ErrorCode};
pub use protocol::{Address, Envelope, MessageType, RawHeader};
