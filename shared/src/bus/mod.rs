//! Message-bus client abstraction
//!
//! The delivery subsystem rides on a pub/sub bus with two logical topics
//! (`orders` edge→core, `dispatch` core→edge). This module defines the
//! client seam plus two transports:
//!
//! ```text
//!         ┌────────────────────┐
//!         │   BusClient trait  │
//!         └────────┬───────────┘
//!                  │
//!         ┌────────┴────────┐
//!         ▼                 ▼
//!     MemoryBus        TcpBusClient
//!     (in-process)     (broker connection)
//! ```
//!
//! `is_connected` is advisory: a publish can still fail after it returns
//! true. Callers that need durability go through the outbox, which is the
//! authoritative guard.

mod frame;
mod memory;
mod tcp;

pub use frame::{read_frame, write_frame, Frame};
pub use memory::MemoryBus;
pub use tcp::TcpBusClient;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::AppResult;
use crate::protocol::Envelope;

/// Per-topic subscription channel capacity.
pub const SUBSCRIBE_CAPACITY: usize = 1024;

/// Client side of the pub/sub bus.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Advisory connection state, read by the outbox drainer before each
    /// tick.
    fn is_connected(&self) -> bool;

    /// Publish raw bytes on a topic.
    async fn publish(&self, topic: &str, payload: &[u8]) -> AppResult<()>;

    /// Subscribe to a topic. The receiver sees every payload published on
    /// the topic from this point on; consumers run their own recv loop.
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>>;

    /// Encode and publish a protocol envelope.
    async fn publish_envelope(&self, topic: &str, env: &Envelope) -> AppResult<()> {
        let bytes = env.encode()?;
        self.publish(topic, &bytes).await
    }
}
