//! Wire protocol for edge↔core messaging
//!
//! Every message on the bus is an [`Envelope`]: a routing header plus a
//! typed payload. Decoding is two-phase so that routing and expiry checks
//! never pay for payload parsing:
//!
//! ```text
//! raw bytes ──▶ RawHeader (phase 1: routing + expiry)
//!           ──▶ Envelope  (phase 2: full message)
//!           ──▶ typed payload (per MessageType, in the ingestor)
//! ```
//!
//! The wire format is JSON with header fields and `payload` at the top
//! level; `payload` stays opaque until phase 2.

mod handler;
mod ingestor;
pub mod payload;

pub use handler::{MessageHandler, NoOpHandler};
pub use ingestor::{FilterFn, IngestStats, Ingestor};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;

/// Tier role names for [`Address::role`].
pub const ROLE_EDGE: &str = "edge";
pub const ROLE_CORE: &str = "core";

/// Generic data channel message type.
pub const TYPE_DATA: &str = "data";

/// Data channel subject constants.
pub const SUBJECT_EDGE_REGISTER: &str = "edge.register";
pub const SUBJECT_EDGE_REGISTERED: &str = "edge.registered";
pub const SUBJECT_EDGE_HEARTBEAT: &str = "edge.heartbeat";
pub const SUBJECT_EDGE_HEARTBEAT_ACK: &str = "edge.heartbeat_ack";
pub const SUBJECT_EDGE_STALE: &str = "edge.stale";
pub const SUBJECT_NODE_LIST_REQUEST: &str = "node.list_request";
pub const SUBJECT_NODE_LIST_RESPONSE: &str = "node.list_response";
pub const SUBJECT_PRODUCTION_REPORT: &str = "production.report";
pub const SUBJECT_PRODUCTION_REPORT_ACK: &str = "production.report_ack";

/// Closed set of protocol message types.
///
/// The wire `type` field stays a plain string so that phase-1 decode
/// survives unknown types; [`MessageType::parse`] classifies at dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Generic data subchannel (registration, heartbeat, node list, production)
    Data,

    // Edge -> Core (published on the orders topic)
    OrderRequest,
    OrderCancel,
    OrderReceipt,
    OrderRedirect,
    OrderStorageWaybill,

    // Core -> Edge (published on the dispatch topic)
    OrderAck,
    OrderWaybill,
    OrderUpdate,
    OrderDelivered,
    OrderError,
    OrderCancelled,
}

impl MessageType {
    /// Wire name of this message type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Data => TYPE_DATA,
            MessageType::OrderRequest => "order.request",
            MessageType::OrderCancel => "order.cancel",
            MessageType::OrderReceipt => "order.receipt",
            MessageType::OrderRedirect => "order.redirect",
            MessageType::OrderStorageWaybill => "order.storage_waybill",
            MessageType::OrderAck => "order.ack",
            MessageType::OrderWaybill => "order.waybill",
            MessageType::OrderUpdate => "order.update",
            MessageType::OrderDelivered => "order.delivered",
            MessageType::OrderError => "order.error",
            MessageType::OrderCancelled => "order.cancelled",
        }
    }

    /// Classify a wire `type` string; `None` for unknown types.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            TYPE_DATA => Some(MessageType::Data),
            "order.request" => Some(MessageType::OrderRequest),
            "order.cancel" => Some(MessageType::OrderCancel),
            "order.receipt" => Some(MessageType::OrderReceipt),
            "order.redirect" => Some(MessageType::OrderRedirect),
            "order.storage_waybill" => Some(MessageType::OrderStorageWaybill),
            "order.ack" => Some(MessageType::OrderAck),
            "order.waybill" => Some(MessageType::OrderWaybill),
            "order.update" => Some(MessageType::OrderUpdate),
            "order.delivered" => Some(MessageType::OrderDelivered),
            "order.error" => Some(MessageType::OrderError),
            "order.cancelled" => Some(MessageType::OrderCancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing address: tier role, physical station, logical node key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub station: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node: String,
}

impl Address {
    /// Address of an edge station.
    pub fn edge(station: impl Into<String>) -> Self {
        Self {
            role: ROLE_EDGE.to_string(),
            station: station.into(),
            node: String::new(),
        }
    }

    /// Address of an edge station's logical node.
    pub fn edge_node(station: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            role: ROLE_EDGE.to_string(),
            station: station.into(),
            node: node.into(),
        }
    }

    /// Address of the core tier (optionally a specific core station).
    pub fn core(station: impl Into<String>) -> Self {
        Self {
            role: ROLE_CORE.to_string(),
            station: station.into(),
            node: String::new(),
        }
    }
}

/// Routing-only projection of an envelope, used in phase-1 decode.
#[derive(Debug, Clone, Deserialize)]
pub struct RawHeader {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub src: Address,
    #[serde(default)]
    pub dst: Address,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RawHeader {
    /// Phase-1 decode: routing header only.
    pub fn decode(data: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| crate::AppError::decode(format!("header decode: {e}")))
    }

    /// True iff `expires_at` is set and now is at or past it.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() >= exp,
            None => false,
        }
    }
}

/// Full protocol message: header fields plus opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub src: Address,
    pub dst: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Opaque until phase-2 typed decode per [`MessageType`].
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create an envelope with a fresh id, UTC timestamp and no expiry.
    pub fn new<T: Serialize>(
        msg_type: MessageType,
        src: Address,
        dst: Address,
        payload: &T,
    ) -> AppResult<Self> {
        Ok(Self {
            msg_type: msg_type.as_str().to_string(),
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            src,
            dst,
            reply_to: None,
            correlation_id: None,
            expires_at: None,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Create a `data` envelope carrying a subject + body on the data
    /// subchannel.
    pub fn new_data<T: Serialize>(
        subject: &str,
        src: Address,
        dst: Address,
        body: &T,
    ) -> AppResult<Self> {
        Self::new(
            MessageType::Data,
            src,
            dst,
            &payload::Data {
                subject: subject.to_string(),
                body: serde_json::to_value(body)?,
            },
        )
    }

    /// Create a reply envelope with `reply_to` set to the request id.
    pub fn new_reply<T: Serialize>(
        msg_type: MessageType,
        src: Address,
        dst: Address,
        reply_to: &str,
        payload: &T,
    ) -> AppResult<Self> {
        let mut env = Self::new(msg_type, src, dst, payload)?;
        env.reply_to = Some(reply_to.to_string());
        Ok(env)
    }

    /// Create a `data` reply with `reply_to` set to the request id.
    pub fn new_data_reply<T: Serialize>(
        subject: &str,
        src: Address,
        dst: Address,
        reply_to: &str,
        body: &T,
    ) -> AppResult<Self> {
        let mut env = Self::new_data(subject, src, dst, body)?;
        env.reply_to = Some(reply_to.to_string());
        Ok(env)
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> AppResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::AppError::decode(format!("encode: {e}")))
    }

    /// Phase-2 decode: the full envelope.
    pub fn decode(data: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| crate::AppError::decode(format!("envelope decode: {e}")))
    }

    /// Decode the payload into its typed variant.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            crate::AppError::with_message(
                crate::ErrorCode::PayloadDecodeFailed,
                format!("payload decode for {}: {e}", self.msg_type),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::payload::{EdgeHeartbeat, OrderRequest};
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        for t in [
            MessageType::Data,
            MessageType::OrderRequest,
            MessageType::OrderStorageWaybill,
            MessageType::OrderCancelled,
        ] {
            assert_eq!(MessageType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MessageType::parse("order.unknown"), None);
    }

    #[test]
    fn test_envelope_roundtrip() {
        let env = Envelope::new(
            MessageType::OrderRequest,
            Address::edge_node("edge-01", "edge-01.stageA"),
            Address::core(""),
            &OrderRequest {
                order_uuid: "u-1".to_string(),
                order_type: "retrieve".to_string(),
                source_node: "stageA".to_string(),
                delivery_node: "line-3".to_string(),
                payload_desc: String::new(),
                quantity: 1,
            },
        )
        .unwrap();

        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, env);

        let typed: OrderRequest = decoded.payload_as().unwrap();
        assert_eq!(typed.order_uuid, "u-1");
        assert_eq!(typed.delivery_node, "line-3");
    }

    #[test]
    fn test_data_envelope_roundtrip() {
        let env = Envelope::new_data(
            SUBJECT_EDGE_HEARTBEAT,
            Address::edge("edge-01"),
            Address::core(""),
            &EdgeHeartbeat {
                station_id: "edge-01".to_string(),
                uptime: 3600,
                orders: 2,
            },
        )
        .unwrap();

        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded, env);

        let data: payload::Data = decoded.payload_as().unwrap();
        assert_eq!(data.subject, SUBJECT_EDGE_HEARTBEAT);
        let hb: EdgeHeartbeat = serde_json::from_value(data.body).unwrap();
        assert_eq!(hb.uptime, 3600);
    }

    #[test]
    fn test_reply_carries_request_id() {
        let req = Envelope::new_data(
            SUBJECT_NODE_LIST_REQUEST,
            Address::edge("edge-01"),
            Address::core(""),
            &serde_json::json!({}),
        )
        .unwrap();
        let reply = Envelope::new_data_reply(
            SUBJECT_NODE_LIST_RESPONSE,
            Address::core("core-01"),
            Address::edge("edge-01"),
            &req.id,
            &serde_json::json!({"nodes": []}),
        )
        .unwrap();
        assert_eq!(reply.reply_to.as_deref(), Some(req.id.as_str()));
        assert_ne!(reply.id, req.id);
    }

    #[test]
    fn test_header_expiry() {
        let json = br#"{"type":"order.ack","id":"x","expires_at":"2000-01-01T00:00:00Z"}"#;
        let hdr = RawHeader::decode(json).unwrap();
        assert!(hdr.is_expired());

        let json = br#"{"type":"order.ack","id":"x"}"#;
        let hdr = RawHeader::decode(json).unwrap();
        assert!(!hdr.is_expired());
    }

    #[test]
    fn test_header_decode_partial_addresses() {
        let json = br#"{"type":"data","id":"y","dst":{"role":"core"}}"#;
        let hdr = RawHeader::decode(json).unwrap();
        assert_eq!(hdr.dst.role, ROLE_CORE);
        assert!(hdr.dst.station.is_empty());
        assert!(hdr.src.role.is_empty());
    }
}
