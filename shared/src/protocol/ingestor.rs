//! Two-phase message ingestion
//!
//! Phase 1 decodes only the routing header so the expiry check and the
//! routing filter never pay for payload parsing; phase 2 decodes the full
//! envelope and dispatches the typed payload to the handler. Every drop
//! is logged and counted; nothing that arrives here is ever fatal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::payload::*;
use super::{Envelope, MessageHandler, MessageType, RawHeader};
use crate::util::truncate_bytes;

/// Returns true if the message should be processed.
pub type FilterFn = Arc<dyn Fn(&RawHeader) -> bool + Send + Sync>;

/// Drop/dispatch counters, readable by diagnostics surfaces.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub handled: AtomicU64,
    pub decode_errors: AtomicU64,
    pub expired: AtomicU64,
    pub filtered: AtomicU64,
    pub payload_errors: AtomicU64,
    pub unknown_type: AtomicU64,
}

/// Performs two-phase decode and dispatches to a [`MessageHandler`].
pub struct Ingestor {
    handler: Arc<dyn MessageHandler>,
    filter: Option<FilterFn>,
    stats: IngestStats,
}

impl Ingestor {
    /// Create an ingestor that accepts every message.
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            handler,
            filter: None,
            stats: IngestStats::default(),
        }
    }

    /// Install a routing filter; messages it rejects are dropped silently.
    pub fn with_filter(mut self, filter: FilterFn) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Counters for dashboards and tests.
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Entry point for raw message bytes from the bus subscription.
    pub async fn handle_raw(&self, data: &[u8]) {
        tracing::trace!(size = data.len(), raw = %truncate_bytes(data, 1024), "ingest raw");

        // Phase 1: decode routing header only
        let hdr = match RawHeader::decode(data) {
            Ok(hdr) => hdr,
            Err(e) => {
                tracing::warn!(error = %e, "ingest: header decode error");
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if hdr.is_expired() {
            tracing::info!(id = %hdr.id, msg_type = %hdr.msg_type, "ingest: dropping expired message");
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if let Some(filter) = &self.filter {
            if !filter(&hdr) {
                self.stats.filtered.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        // Phase 2: full envelope decode
        let env = match Envelope::decode(data) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(id = %hdr.id, error = %e, "ingest: envelope decode error");
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.dispatch(&env).await;
    }

    async fn dispatch(&self, env: &Envelope) {
        let Some(msg_type) = MessageType::parse(&env.msg_type) else {
            tracing::warn!(msg_type = %env.msg_type, id = %env.id, "ingest: unknown message type");
            self.stats.unknown_type.fetch_add(1, Ordering::Relaxed);
            return;
        };

        tracing::debug!(msg_type = %msg_type, id = %env.id, "ingest: dispatch");

        macro_rules! decode_and_call {
            ($ty:ty, $method:ident) => {
                match env.payload_as::<$ty>() {
                    Ok(p) => {
                        self.handler.$method(env, &p).await;
                        self.stats.handled.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(msg_type = %env.msg_type, id = %env.id, error = %e,
                            "ingest: payload decode error");
                        self.stats.payload_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            };
        }

        match msg_type {
            MessageType::Data => decode_and_call!(Data, handle_data),
            MessageType::OrderRequest => decode_and_call!(OrderRequest, handle_order_request),
            MessageType::OrderCancel => decode_and_call!(OrderCancel, handle_order_cancel),
            MessageType::OrderReceipt => decode_and_call!(OrderReceipt, handle_order_receipt),
            MessageType::OrderRedirect => decode_and_call!(OrderRedirect, handle_order_redirect),
            MessageType::OrderStorageWaybill => {
                decode_and_call!(OrderStorageWaybill, handle_order_storage_waybill)
            }
            MessageType::OrderAck => decode_and_call!(OrderAck, handle_order_ack),
            MessageType::OrderWaybill => decode_and_call!(OrderWaybill, handle_order_waybill),
            MessageType::OrderUpdate => decode_and_call!(OrderUpdate, handle_order_update),
            MessageType::OrderDelivered => decode_and_call!(OrderDelivered, handle_order_delivered),
            MessageType::OrderError => decode_and_call!(OrderError, handle_order_error),
            MessageType::OrderCancelled => decode_and_call!(OrderCancelled, handle_order_cancelled),
        }
    }
}
