//! Handler for inbound dispatch-topic messages
//!
//! Order lifecycle messages update the engine's active order set and
//! surface as engine events; data-subchannel messages maintain the core
//! node cache and log acknowledgements.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use shared::protocol::payload::*;
use shared::protocol::{self, Envelope, MessageHandler};

use crate::engine::Engine;

pub struct EdgeHandler {
    engine: Arc<Engine>,
}

impl EdgeHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MessageHandler for EdgeHandler {
    async fn handle_data(&self, env: &Envelope, p: &Data) {
        match p.subject.as_str() {
            protocol::SUBJECT_EDGE_REGISTERED => {
                match serde_json::from_value::<EdgeRegistered>(p.body.clone()) {
                    Ok(reg) => {
                        tracing::info!(station = %reg.station_id, message = %reg.message,
                            "registered with core")
                    }
                    Err(e) => tracing::warn!(error = %e, "decode edge.registered body"),
                }
            }
            protocol::SUBJECT_EDGE_HEARTBEAT_ACK => {
                tracing::debug!(reply_to = ?env.reply_to, "heartbeat acknowledged");
            }
            protocol::SUBJECT_NODE_LIST_RESPONSE => {
                match serde_json::from_value::<NodeListResponse>(p.body.clone()) {
                    Ok(resp) => {
                        tracing::info!(nodes = resp.nodes.len(), "core node list received");
                        let nodes: HashMap<String, String> = resp
                            .nodes
                            .into_iter()
                            .map(|n| (n.name, n.node_type))
                            .collect();
                        self.engine.set_core_nodes(nodes);
                    }
                    Err(e) => tracing::warn!(error = %e, "decode node.list_response body"),
                }
            }
            protocol::SUBJECT_EDGE_STALE => {
                match serde_json::from_value::<EdgeStale>(p.body.clone()) {
                    Ok(stale) => tracing::warn!(station = %stale.station_id, reason = %stale.reason,
                        "core marked this edge stale"),
                    Err(e) => tracing::warn!(error = %e, "decode edge.stale body"),
                }
            }
            protocol::SUBJECT_PRODUCTION_REPORT_ACK => {
                match serde_json::from_value::<ProductionReportAck>(p.body.clone()) {
                    Ok(ack) => tracing::info!(accepted = ack.accepted, "production report accepted"),
                    Err(e) => tracing::warn!(error = %e, "decode production.report_ack body"),
                }
            }
            other => tracing::warn!(subject = %other, "unhandled data subject"),
        }
    }

    async fn handle_order_ack(&self, _env: &Envelope, p: &OrderAck) {
        tracing::info!(order_uuid = %p.order_uuid, order_id = p.order_id,
            rds_order_id = %p.rds_order_id, "order acknowledged by core");
        let status = if p.status.is_empty() {
            "accepted"
        } else {
            p.status.as_str()
        };
        self.engine.order_transition(&p.order_uuid, status, "", false);
    }

    async fn handle_order_waybill(&self, _env: &Envelope, p: &OrderWaybill) {
        tracing::info!(order_uuid = %p.order_uuid, vehicle = %p.vehicle, eta = %p.eta,
            "waybill issued");
        self.engine
            .order_transition(&p.order_uuid, "waybill", &p.vehicle, false);
    }

    async fn handle_order_update(&self, _env: &Envelope, p: &OrderUpdate) {
        tracing::info!(order_uuid = %p.order_uuid, status = %p.status, detail = %p.detail,
            "order update");
        self.engine
            .order_transition(&p.order_uuid, &p.status, &p.detail, false);
    }

    async fn handle_order_delivered(&self, _env: &Envelope, p: &OrderDelivered) {
        tracing::info!(order_uuid = %p.order_uuid, "order delivered");
        self.engine
            .order_transition(&p.order_uuid, "delivered", "", true);
    }

    async fn handle_order_error(&self, _env: &Envelope, p: &OrderError) {
        tracing::error!(order_uuid = %p.order_uuid, code = %p.code, message = %p.message,
            "order failed");
        self.engine
            .order_transition(&p.order_uuid, "error", &p.message, true);
    }

    async fn handle_order_cancelled(&self, _env: &Envelope, p: &OrderCancelled) {
        tracing::info!(order_uuid = %p.order_uuid, reason = %p.reason, "order cancelled");
        self.engine
            .order_transition(&p.order_uuid, "cancelled", &p.reason, true);
    }
}
