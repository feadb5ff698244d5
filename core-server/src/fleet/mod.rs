//! Fleet manager integration
//!
//! The fleet manager (autonomous vehicle dispatch, "RDS") is polled, not
//! push: the [`Poller`] turns order-state reads into transition events.
//! [`RdsClient`] is the HTTP surface; [`FleetBackend`] is the seam the
//! poller and tests depend on.

mod client;
mod poller;

pub use client::RdsClient;
pub use poller::{OrderIdResolver, Poller, PollerEmitter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shared::AppResult;

/// Remote order states reported by the fleet manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    Created,
    Assigned,
    Executing,
    Arrived,
    Completed,
    Failed,
    Cancelled,
}

impl OrderState {
    /// Terminal states see no further transitions; the poller drops the
    /// entry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Completed | OrderState::Failed | OrderState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "Created",
            OrderState::Assigned => "Assigned",
            OrderState::Executing => "Executing",
            OrderState::Arrived => "Arrived",
            OrderState::Completed => "Completed",
            OrderState::Failed => "Failed",
            OrderState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response envelope used by the fleet API; `code != 0` is an error.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// `GET /ping` result.
#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub version: String,
}

/// `GET /licInfo` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct LicenseInfo {
    #[serde(default)]
    pub licensed_to: String,
    #[serde(default)]
    pub expires: String,
    #[serde(default)]
    pub vehicle_limit: i64,
}

/// `GET /order/details/{id}` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderDetail {
    pub state: OrderState,
    #[serde(default)]
    pub vehicle: String,
    #[serde(default)]
    pub detail: String,
}

/// The fleet surface the poller consumes. Adapters for other vendors
/// implement this.
#[async_trait]
pub trait FleetBackend: Send + Sync {
    /// Human-readable backend name for logs and dashboards.
    fn name(&self) -> &str;

    /// Connectivity check.
    async fn ping(&self) -> AppResult<PingResponse>;

    /// Current remote state of one order.
    async fn order_details(&self, rds_order_id: &str) -> AppResult<OrderDetail>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!OrderState::Created.is_terminal());
        assert!(!OrderState::Executing.is_terminal());
        assert!(OrderState::Completed.is_terminal());
        assert!(OrderState::Failed.is_terminal());
        assert!(OrderState::Cancelled.is_terminal());
    }

    #[test]
    fn test_state_decodes_from_wire_name() {
        let detail: OrderDetail =
            serde_json::from_str(r#"{"state":"Assigned","vehicle":"AGV-4"}"#).unwrap();
        assert_eq!(detail.state, OrderState::Assigned);
        assert_eq!(detail.vehicle, "AGV-4");
    }
}
