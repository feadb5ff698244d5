//! Durable store-and-forward outbox
//!
//! Each tier owns a local outbox table; producers enqueue, the
//! [`OutboxDrainer`] pumps pending rows to the bus. Delivery is
//! at-least-once: a publish that lands on the bus but crashes before the
//! ack is retried on the next tick, so handlers must be idempotent by
//! envelope id. A row whose retries reach [`MAX_OUTBOX_RETRIES`] is
//! dead-lettered and never published again.

mod drainer;

pub use drainer::OutboxDrainer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::AppResult;

/// Delivery attempts before a message is dead-lettered and skipped by the
/// drainer.
pub const MAX_OUTBOX_RETRIES: i64 = 10;

/// Rows fetched per drain tick.
pub const DRAIN_BATCH: i64 = 50;

/// Drain ticks between purge passes.
pub const PURGE_EVERY_TICKS: u64 = 100;

/// Age past which acked and dead-lettered rows are purged.
pub const PURGE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default drain interval.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(5);

/// A queued outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    /// Monotonically increasing row id; publish order within a topic.
    pub id: i64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub msg_type: String,
    pub retries: i64,
    pub created_at: DateTime<Utc>,
    /// Set on ack. `None` means pending or dead-lettered.
    pub sent_at: Option<DateTime<Utc>>,
}

/// Storage contract for the outbox.
///
/// The store is the synchronization authority: multiple enqueuers are
/// safe, a single drainer reader suffices, and no lock may be held across
/// a publish.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Append a message atomically; returns the monotonic row id.
    async fn enqueue(&self, topic: &str, payload: &[u8], msg_type: &str) -> AppResult<i64>;

    /// Up to `limit` rows with `sent_at IS NULL AND retries < MAX`, by id
    /// ascending.
    async fn list_pending(&self, limit: i64) -> AppResult<Vec<OutboxMessage>>;

    /// Mark a row sent now. Idempotent.
    async fn ack(&self, id: i64) -> AppResult<()>;

    /// Add one delivery failure; at [`MAX_OUTBOX_RETRIES`] the row is
    /// dead-lettered.
    async fn increment_retries(&self, id: i64) -> AppResult<()>;

    /// Delete rows acked before the cutoff, and dead-lettered rows created
    /// before the cutoff. Never removes a still-pending row.
    async fn purge(&self, older_than: Duration) -> AppResult<u64>;
}
