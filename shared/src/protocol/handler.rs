//! Handler dispatch for typed protocol messages
//!
//! One method per message variant, each with a no-op default body, so a
//! concrete handler overrides only the variants it cares about. The
//! enclosing envelope is passed alongside every decoded payload because
//! handlers need `src`, `id` and `timestamp` for replies and logging.

use async_trait::async_trait;

use super::payload::*;
use super::Envelope;

/// Callbacks for all protocol message types.
///
/// Implement the subset you need; everything else no-ops.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Generic data channel (registration, heartbeat, node list, production).
    async fn handle_data(&self, _env: &Envelope, _p: &Data) {}

    // Edge -> Core
    async fn handle_order_request(&self, _env: &Envelope, _p: &OrderRequest) {}
    async fn handle_order_cancel(&self, _env: &Envelope, _p: &OrderCancel) {}
    async fn handle_order_receipt(&self, _env: &Envelope, _p: &OrderReceipt) {}
    async fn handle_order_redirect(&self, _env: &Envelope, _p: &OrderRedirect) {}
    async fn handle_order_storage_waybill(&self, _env: &Envelope, _p: &OrderStorageWaybill) {}

    // Core -> Edge
    async fn handle_order_ack(&self, _env: &Envelope, _p: &OrderAck) {}
    async fn handle_order_waybill(&self, _env: &Envelope, _p: &OrderWaybill) {}
    async fn handle_order_update(&self, _env: &Envelope, _p: &OrderUpdate) {}
    async fn handle_order_delivered(&self, _env: &Envelope, _p: &OrderDelivered) {}
    async fn handle_order_error(&self, _env: &Envelope, _p: &OrderError) {}
    async fn handle_order_cancelled(&self, _env: &Envelope, _p: &OrderCancelled) {}
}

/// Handler with every method left at its no-op default.
///
/// Useful as a placeholder and in tests asserting that nothing fires.
pub struct NoOpHandler;

#[async_trait]
impl MessageHandler for NoOpHandler {}
