//! Edge engine
//!
//! Owns the in-process event channel and the station's runtime state:
//! active order statuses, the cached core node list, and the counter
//! tracker. Outbound messages (order requests, production reports) are
//! enqueued into the outbox here; the drainer moves them to the bus.

pub mod counter;
pub mod events;
pub mod hourly_tracker;

pub use counter::{calculate_delta, CounterTracker, ReportingPoint};
pub use events::{Anomaly, CounterDeltaEvent, EngineEvent};
pub use hourly_tracker::HourlyTracker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use uuid::Uuid;

use shared::outbox::OutboxStore;
use shared::protocol::payload::{OrderRequest, ProductionReport, ProductionReportEntry};
use shared::protocol::{self, Address, Envelope, MessageType};
use shared::AppResult;

use crate::core::config::Config;
use crate::db::OutboxRepository;
use events::OrderStatusChangedEvent;

/// Event channel capacity; laggy subscribers drop oldest events.
const EVENT_CAPACITY: usize = 256;

pub struct Engine {
    config: Config,
    outbox: OutboxRepository,
    events: broadcast::Sender<EngineEvent>,
    pub counter_tracker: CounterTracker,
    /// Active order statuses by order uuid.
    active_orders: Mutex<HashMap<String, String>>,
    /// Core node name -> node type, from the last node.list_response.
    core_nodes: Mutex<HashMap<String, String>>,
}

impl Engine {
    pub fn new(config: Config, outbox: OutboxRepository) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let counter_tracker = CounterTracker::new(config.jump_threshold, events.clone());
        Arc::new(Self {
            config,
            outbox,
            events,
            counter_tracker,
            active_orders: Mutex::new(HashMap::new()),
            core_nodes: Mutex::new(HashMap::new()),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Source address for envelopes originating here.
    fn src(&self) -> Address {
        Address::edge_node(&self.config.station_id, &self.config.node_id)
    }

    // ==================== Orders ====================

    /// Number of active (non-terminal) orders; feeds the heartbeat.
    pub fn active_order_count(&self) -> usize {
        self.active_orders.lock().unwrap().len()
    }

    /// Originate a material-movement order: enqueue `order.request` on the
    /// orders topic and start tracking the uuid locally.
    pub async fn submit_order(
        &self,
        order_type: &str,
        source_node: &str,
        delivery_node: &str,
        payload_desc: &str,
        quantity: i64,
    ) -> AppResult<String> {
        let order_uuid = Uuid::new_v4().to_string();
        let req = OrderRequest {
            order_uuid: order_uuid.clone(),
            order_type: order_type.to_string(),
            source_node: source_node.to_string(),
            delivery_node: delivery_node.to_string(),
            payload_desc: payload_desc.to_string(),
            quantity,
        };
        let env = Envelope::new(MessageType::OrderRequest, self.src(), Address::core(""), &req)?;
        self.enqueue_envelope(&env).await?;

        self.active_orders
            .lock()
            .unwrap()
            .insert(order_uuid.clone(), "requested".to_string());
        tracing::info!(order_uuid = %order_uuid, order_type, delivery_node, "order submitted");
        Ok(order_uuid)
    }

    /// Record a lifecycle transition observed on the dispatch topic.
    /// Terminal transitions drop the order from the active set.
    pub fn order_transition(&self, order_uuid: &str, new_status: &str, detail: &str, terminal: bool) {
        let old_status = {
            let mut orders = self.active_orders.lock().unwrap();
            if terminal {
                orders.remove(order_uuid)
            } else {
                orders.insert(order_uuid.to_string(), new_status.to_string())
            }
        }
        .unwrap_or_default();

        if old_status == new_status {
            return;
        }

        let _ = self
            .events
            .send(EngineEvent::OrderStatusChanged(OrderStatusChangedEvent {
                order_uuid: order_uuid.to_string(),
                old_status,
                new_status: new_status.to_string(),
                detail: detail.to_string(),
            }));
    }

    // ==================== Core nodes ====================

    /// Replace the cached core node list.
    pub fn set_core_nodes(&self, nodes: HashMap<String, String>) {
        let names: Vec<String> = {
            let mut cache = self.core_nodes.lock().unwrap();
            *cache = nodes;
            cache.keys().cloned().collect()
        };
        let _ = self.events.send(EngineEvent::CoreNodesUpdated(
            events::CoreNodesUpdatedEvent { nodes: names },
        ));
    }

    pub fn core_nodes(&self) -> HashMap<String, String> {
        self.core_nodes.lock().unwrap().clone()
    }

    // ==================== Production ====================

    /// Push accumulated production counts to core via the outbox.
    /// Entries with an empty category or non-positive count are filtered
    /// out core-side; sending them anyway wastes a round trip, so skip
    /// them here too.
    pub async fn report_production(
        &self,
        entries: Vec<ProductionReportEntry>,
    ) -> AppResult<Option<i64>> {
        let reports: Vec<ProductionReportEntry> = entries
            .into_iter()
            .filter(|e| !e.cat_id.is_empty() && e.count > 0)
            .collect();
        if reports.is_empty() {
            return Ok(None);
        }

        let report = ProductionReport {
            station_id: self.config.station_id.clone(),
            reports,
        };
        let env = Envelope::new_data(
            protocol::SUBJECT_PRODUCTION_REPORT,
            self.src(),
            Address::core(""),
            &report,
        )?;
        let id = self.enqueue_envelope(&env).await?;
        Ok(Some(id))
    }

    /// Encode an envelope and append it to the outbox on the orders topic.
    pub async fn enqueue_envelope(&self, env: &Envelope) -> AppResult<i64> {
        let bytes = env.encode()?;
        self.outbox
            .enqueue(&self.config.orders_topic, &bytes, &env.msg_type)
            .await
    }
}
