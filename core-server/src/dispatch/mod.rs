//! Order dispatch
//!
//! [`Dispatcher`] is the collaborator the core handler hands order
//! messages to. [`FleetDispatcher`] is the production implementation: it
//! acks requests back to the originating edge, registers the remote
//! order with the fleet poller, and converts poller transitions into
//! lifecycle messages on the dispatch topic. Everything outbound goes
//! through the core outbox.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use shared::outbox::OutboxStore;
use shared::protocol::payload::*;
use shared::protocol::{Address, Envelope, MessageType};
use shared::{AppError, AppResult};

use crate::db::OutboxRepository;
use crate::fleet::{OrderIdResolver, OrderState, Poller, PollerEmitter};

/// Receives order messages from the core handler, one method per type.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn handle_order_request(&self, env: &Envelope, p: &OrderRequest);
    async fn handle_order_cancel(&self, env: &Envelope, p: &OrderCancel);
    async fn handle_order_receipt(&self, env: &Envelope, p: &OrderReceipt);
    async fn handle_order_redirect(&self, env: &Envelope, p: &OrderRedirect);
    async fn handle_order_storage_waybill(&self, env: &Envelope, p: &OrderStorageWaybill);
}

/// One in-flight order as the dispatcher sees it.
#[derive(Debug, Clone)]
struct OrderRef {
    order_id: i64,
    order_uuid: String,
    /// Originating edge station; lifecycle replies go back here.
    station: String,
}

pub struct FleetDispatcher {
    outbox: OutboxRepository,
    /// Late-bound: the poller is constructed with this dispatcher as its
    /// emitter/resolver, then attached here.
    poller: OnceLock<Arc<Poller>>,
    station_id: String,
    dispatch_topic: String,
    /// rds order id -> local order reference
    orders: DashMap<String, OrderRef>,
    next_order_id: AtomicI64,
}

impl FleetDispatcher {
    pub fn new(
        outbox: OutboxRepository,
        station_id: impl Into<String>,
        dispatch_topic: impl Into<String>,
    ) -> Self {
        Self {
            outbox,
            poller: OnceLock::new(),
            station_id: station_id.into(),
            dispatch_topic: dispatch_topic.into(),
            orders: DashMap::new(),
            next_order_id: AtomicI64::new(1),
        }
    }

    /// Attach the poller once both sides exist.
    pub fn attach_poller(&self, poller: Arc<Poller>) {
        if self.poller.set(poller).is_err() {
            tracing::warn!("dispatch: poller already attached");
        }
    }

    fn track(&self, rds_order_id: &str) {
        match self.poller.get() {
            Some(poller) => poller.track(rds_order_id),
            None => tracing::error!(rds_order_id, "dispatch: no poller attached"),
        }
    }

    fn untrack(&self, rds_order_id: &str) {
        if let Some(poller) = self.poller.get() {
            poller.untrack(rds_order_id);
        }
    }

    fn src(&self) -> Address {
        Address::core(&self.station_id)
    }

    /// Encode and enqueue a lifecycle message on the dispatch topic.
    async fn enqueue(&self, env: &Envelope) {
        let bytes = match env.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "dispatch: encode failed");
                return;
            }
        };
        if let Err(e) = self
            .outbox
            .enqueue(&self.dispatch_topic, &bytes, &env.msg_type)
            .await
        {
            tracing::error!(error = %e, msg_type = %env.msg_type, "dispatch: enqueue failed");
        }
    }

    fn find_by_uuid(&self, order_uuid: &str) -> Option<(String, OrderRef)> {
        self.orders
            .iter()
            .find(|entry| entry.value().order_uuid == order_uuid)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }
}

#[async_trait]
impl Dispatcher for FleetDispatcher {
    async fn handle_order_request(&self, env: &Envelope, p: &OrderRequest) {
        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        // The fleet vendor's create call plugs in here; until then the
        // remote id is minted locally and tracked from Created.
        let rds_order_id = format!("RDS-{}", Uuid::new_v4().simple());

        self.orders.insert(
            rds_order_id.clone(),
            OrderRef {
                order_id,
                order_uuid: p.order_uuid.clone(),
                station: env.src.station.clone(),
            },
        );
        self.track(&rds_order_id);

        tracing::info!(
            order_uuid = %p.order_uuid,
            order_id,
            rds_order_id = %rds_order_id,
            delivery_node = %p.delivery_node,
            "order dispatched to fleet"
        );

        match Envelope::new_reply(
            MessageType::OrderAck,
            self.src(),
            Address::edge(&env.src.station),
            &env.id,
            &OrderAck {
                order_uuid: p.order_uuid.clone(),
                order_id,
                rds_order_id,
                status: "accepted".to_string(),
            },
        ) {
            Ok(reply) => self.enqueue(&reply).await,
            Err(e) => tracing::error!(error = %e, "dispatch: build order ack failed"),
        }
    }

    async fn handle_order_cancel(&self, env: &Envelope, p: &OrderCancel) {
        let Some((rds_order_id, order_ref)) = self.find_by_uuid(&p.order_uuid) else {
            tracing::warn!(order_uuid = %p.order_uuid, "cancel for unknown order");
            return;
        };
        self.untrack(&rds_order_id);
        self.orders.remove(&rds_order_id);

        match Envelope::new_reply(
            MessageType::OrderCancelled,
            self.src(),
            Address::edge(&order_ref.station),
            &env.id,
            &OrderCancelled {
                order_uuid: p.order_uuid.clone(),
                reason: p.reason.clone(),
            },
        ) {
            Ok(reply) => self.enqueue(&reply).await,
            Err(e) => tracing::error!(error = %e, "dispatch: build order cancelled failed"),
        }
    }

    async fn handle_order_receipt(&self, _env: &Envelope, p: &OrderReceipt) {
        tracing::info!(order_uuid = %p.order_uuid, received_by = %p.received_by,
            "delivery receipt confirmed");
    }

    async fn handle_order_redirect(&self, _env: &Envelope, p: &OrderRedirect) {
        tracing::info!(order_uuid = %p.order_uuid, new_delivery_node = %p.new_delivery_node,
            "order redirect requested");
    }

    async fn handle_order_storage_waybill(&self, env: &Envelope, p: &OrderStorageWaybill) {
        tracing::info!(order_uuid = %p.order_uuid, storage_node = %p.storage_node,
            "storage waybill requested");

        match Envelope::new_reply(
            MessageType::OrderWaybill,
            self.src(),
            Address::edge(&env.src.station),
            &env.id,
            &OrderWaybill {
                order_uuid: p.order_uuid.clone(),
                vehicle: String::new(),
                eta: String::new(),
            },
        ) {
            Ok(reply) => self.enqueue(&reply).await,
            Err(e) => tracing::error!(error = %e, "dispatch: build waybill failed"),
        }
    }
}

#[async_trait]
impl OrderIdResolver for FleetDispatcher {
    async fn resolve_rds_order_id(&self, rds_order_id: &str) -> AppResult<i64> {
        self.orders
            .get(rds_order_id)
            .map(|r| r.order_id)
            .ok_or_else(|| AppError::resolve(format!("unknown rds order {rds_order_id}")))
    }
}

#[async_trait]
impl PollerEmitter for FleetDispatcher {
    /// Convert a fleet transition into the matching lifecycle message for
    /// the originating edge.
    async fn emit_order_status_changed(
        &self,
        order_id: i64,
        rds_order_id: &str,
        _old_state: OrderState,
        new_state: OrderState,
        vehicle: &str,
        detail: &str,
    ) {
        let Some(order_ref) = self.orders.get(rds_order_id).map(|r| r.value().clone()) else {
            tracing::warn!(rds_order_id, "transition for unmapped order");
            return;
        };
        let dst = Address::edge(&order_ref.station);

        let env = match new_state {
            OrderState::Completed => Envelope::new(
                MessageType::OrderDelivered,
                self.src(),
                dst,
                &OrderDelivered {
                    order_uuid: order_ref.order_uuid.clone(),
                    delivered_at: Some(chrono::Utc::now()),
                },
            ),
            OrderState::Failed => Envelope::new(
                MessageType::OrderError,
                self.src(),
                dst,
                &OrderError {
                    order_uuid: order_ref.order_uuid.clone(),
                    code: String::new(),
                    message: detail.to_string(),
                },
            ),
            OrderState::Cancelled => Envelope::new(
                MessageType::OrderCancelled,
                self.src(),
                dst,
                &OrderCancelled {
                    order_uuid: order_ref.order_uuid.clone(),
                    reason: detail.to_string(),
                },
            ),
            state => Envelope::new(
                MessageType::OrderUpdate,
                self.src(),
                dst,
                &OrderUpdate {
                    order_uuid: order_ref.order_uuid.clone(),
                    status: state.as_str().to_lowercase(),
                    vehicle: vehicle.to_string(),
                    detail: detail.to_string(),
                },
            ),
        };

        match env {
            Ok(env) => self.enqueue(&env).await,
            Err(e) => {
                tracing::error!(order_id, error = %e, "dispatch: build lifecycle message failed")
            }
        }

        if new_state.is_terminal() {
            self.orders.remove(rds_order_id);
        }
    }
}
