//! Typed payload variants for the protocol
//!
//! One struct per [`MessageType`](super::MessageType) plus the bodies
//! carried on the `data` subchannel. Field names are the wire contract;
//! additive changes only.

use serde::{Deserialize, Serialize};

// ==================== Data subchannel ====================

/// Generic data-channel payload: a subject plus an opaque body decoded
/// per subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub subject: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

/// `edge.register` — sent once at edge startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRegister {
    pub station_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub line_ids: Vec<String>,
}

/// `edge.registered` — core's reply to a registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRegistered {
    pub station_id: String,
    pub message: String,
}

/// `edge.heartbeat` — periodic liveness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeHeartbeat {
    pub station_id: String,
    /// Seconds since the edge process started.
    pub uptime: i64,
    /// Active (non-terminal) order count.
    #[serde(default)]
    pub orders: i64,
}

/// `edge.heartbeat_ack` — core's reply to a heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeHeartbeatAck {
    pub station_id: String,
    pub server_ts: chrono::DateTime<chrono::Utc>,
}

/// `edge.stale` — unsolicited notification that core marked an edge stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeStale {
    pub station_id: String,
    pub reason: String,
}

/// `node.list_request` — edge asks core for the routable node list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeListRequest {}

/// One routable node in a `node.list_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub node_type: String,
}

/// `node.list_response` — core's node list reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeListResponse {
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

/// One category entry in a `production.report`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionReportEntry {
    pub cat_id: String,
    pub count: i64,
}

/// `production.report` — edge pushes accumulated production counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionReport {
    pub station_id: String,
    #[serde(default)]
    pub reports: Vec<ProductionReportEntry>,
}

/// `production.report_ack` — core's reply with the accepted entry count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionReportAck {
    pub station_id: String,
    pub accepted: i64,
}

// ==================== Edge -> Core order operations ====================

/// `order.request` — originate a material-movement order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_uuid: String,
    pub order_type: String,
    pub source_node: String,
    pub delivery_node: String,
    #[serde(default)]
    pub payload_desc: String,
    #[serde(default)]
    pub quantity: i64,
}

/// `order.cancel` — request cancellation of an in-flight order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancel {
    pub order_uuid: String,
    #[serde(default)]
    pub reason: String,
}

/// `order.receipt` — edge confirms delivery was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_uuid: String,
    #[serde(default)]
    pub received_by: String,
}

/// `order.redirect` — reroute an order to a different delivery node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRedirect {
    pub order_uuid: String,
    pub new_delivery_node: String,
}

/// `order.storage_waybill` — edge requests a storage movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStorageWaybill {
    pub order_uuid: String,
    pub storage_node: String,
    #[serde(default)]
    pub payload_desc: String,
}

// ==================== Core -> Edge order lifecycle ====================

/// `order.ack` — core accepted the order and assigned ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_uuid: String,
    pub order_id: i64,
    #[serde(default)]
    pub rds_order_id: String,
    #[serde(default)]
    pub status: String,
}

/// `order.waybill` — a vehicle was dispatched for the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderWaybill {
    pub order_uuid: String,
    #[serde(default)]
    pub vehicle: String,
    #[serde(default)]
    pub eta: String,
}

/// `order.update` — lifecycle state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_uuid: String,
    pub status: String,
    #[serde(default)]
    pub vehicle: String,
    #[serde(default)]
    pub detail: String,
}

/// `order.delivered` — the order reached its delivery node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub order_uuid: String,
    #[serde(default)]
    pub delivered_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// `order.error` — the order failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderError {
    pub order_uuid: String,
    #[serde(default)]
    pub code: String,
    pub message: String,
}

/// `order.cancelled` — the order was cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_uuid: String,
    #[serde(default)]
    pub reason: String,
}
