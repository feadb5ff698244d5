//! Events emitted by the edge engine
//!
//! Carried on a tokio broadcast channel; the hourly tracker and any
//! future listeners subscribe independently.

use serde::Serialize;

/// Counter anomaly classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Anomaly {
    /// Normal production delta.
    None,
    /// Genuine backward count: PLC restore/reset. The delta carries the
    /// new absolute value, not a difference.
    Reset,
    /// Forward delta above the jump threshold.
    Jump,
}

impl Anomaly {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anomaly::None => "",
            Anomaly::Reset => "reset",
            Anomaly::Jump => "jump",
        }
    }
}

/// Envelope for events on the engine's broadcast channel.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    CounterRead(CounterReadEvent),
    CounterDelta(CounterDeltaEvent),
    CounterAnomaly(CounterAnomalyEvent),
    OrderStatusChanged(OrderStatusChangedEvent),
    CoreNodesUpdated(CoreNodesUpdatedEvent),
}

/// Emitted on every counter observation.
#[derive(Debug, Clone, Serialize)]
pub struct CounterReadEvent {
    pub reporting_point_id: i64,
    pub value: i64,
}

/// Emitted when production count changes.
#[derive(Debug, Clone, Serialize)]
pub struct CounterDeltaEvent {
    pub reporting_point_id: i64,
    pub line_id: i64,
    pub job_style_id: i64,
    pub delta: i64,
    pub new_count: i64,
    /// `Reset` deltas carry the absolute restored value in `delta`.
    pub anomaly: Anomaly,
}

/// Emitted for counter resets and jumps.
#[derive(Debug, Clone, Serialize)]
pub struct CounterAnomalyEvent {
    pub reporting_point_id: i64,
    pub old_value: i64,
    pub new_value: i64,
    pub anomaly: Anomaly,
}

/// Emitted on order lifecycle transitions observed from the dispatch
/// topic.
#[derive(Debug, Clone, Serialize)]
pub struct OrderStatusChangedEvent {
    pub order_uuid: String,
    pub old_status: String,
    pub new_status: String,
    pub detail: String,
}

/// Emitted when the core node list is received.
#[derive(Debug, Clone, Serialize)]
pub struct CoreNodesUpdatedEvent {
    pub nodes: Vec<String>,
}
