//! Fleet order poller
//!
//! Tracks active remote order ids and converts observed state changes
//! into `OrderStatusChanged` emissions. The active map is only ever held
//! for O(1) operations; every fleet call happens with the lock released,
//! so a slow vendor API never blocks track/untrack.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use shared::AppResult;

use super::{FleetBackend, OrderState};

/// Receives state transition events from the poller.
#[async_trait]
pub trait PollerEmitter: Send + Sync {
    async fn emit_order_status_changed(
        &self,
        order_id: i64,
        rds_order_id: &str,
        old_state: OrderState,
        new_state: OrderState,
        vehicle: &str,
        detail: &str,
    );
}

/// Maps remote order ids back to local order ids.
#[async_trait]
pub trait OrderIdResolver: Send + Sync {
    async fn resolve_rds_order_id(&self, rds_order_id: &str) -> AppResult<i64>;
}

/// Periodically checks active fleet orders for state transitions.
pub struct Poller {
    backend: Arc<dyn FleetBackend>,
    emitter: Arc<dyn PollerEmitter>,
    resolver: Arc<dyn OrderIdResolver>,
    interval: Duration,
    /// rds order id -> last observed state
    active: Mutex<HashMap<String, OrderState>>,
    shutdown: CancellationToken,
}

impl Poller {
    pub fn new(
        backend: Arc<dyn FleetBackend>,
        emitter: Arc<dyn PollerEmitter>,
        resolver: Arc<dyn OrderIdResolver>,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            emitter,
            resolver,
            interval,
            active: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Add an order to the active poll set with initial state `Created`.
    /// Tracking an already-tracked id keeps the observed state.
    pub fn track(&self, rds_order_id: &str) {
        let mut active = self.active.lock().unwrap();
        active
            .entry(rds_order_id.to_string())
            .or_insert(OrderState::Created);
    }

    /// Remove an order from the active poll set.
    pub fn untrack(&self, rds_order_id: &str) {
        self.active.lock().unwrap().remove(rds_order_id);
    }

    /// Number of orders being polled.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn start(self: &Arc<Self>) {
        let poller = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                backend = poller.backend.name(),
                interval_ms = poller.interval.as_millis() as u64,
                "fleet poller started"
            );
            let mut ticker = tokio::time::interval(poller.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = poller.shutdown.cancelled() => break,
                    _ = ticker.tick() => poller.poll().await,
                }
            }
            tracing::info!("fleet poller stopped");
        });
    }

    /// Stop the poll loop. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// One poll pass over a snapshot of the active set.
    pub async fn poll(&self) {
        let ids: Vec<String> = {
            let active = self.active.lock().unwrap();
            active.keys().cloned().collect()
        };
        if !ids.is_empty() {
            tracing::debug!(active = ids.len(), "fleet poll");
        }

        for rds_id in ids {
            let detail = match self.backend.order_details(&rds_id).await {
                Ok(detail) => detail,
                Err(e) => {
                    // Transient fleet errors never purge active entries.
                    tracing::warn!(rds_order_id = %rds_id, error = %e, "fleet order read failed");
                    continue;
                }
            };

            let new_state = detail.state;
            let old_state = {
                let mut active = self.active.lock().unwrap();
                let Some(&old_state) = active.get(&rds_id) else {
                    continue; // untracked concurrently
                };
                if new_state == old_state {
                    continue;
                }
                if new_state.is_terminal() {
                    active.remove(&rds_id);
                } else {
                    active.insert(rds_id.clone(), new_state);
                }
                old_state
            };

            tracing::info!(
                rds_order_id = %rds_id,
                old = %old_state,
                new = %new_state,
                vehicle = %detail.vehicle,
                "fleet order transition"
            );

            let order_id = match self.resolver.resolve_rds_order_id(&rds_id).await {
                Ok(order_id) => order_id,
                Err(e) => {
                    tracing::warn!(rds_order_id = %rds_id, error = %e, "order id resolve failed");
                    continue;
                }
            };

            self.emitter
                .emit_order_status_changed(
                    order_id,
                    &rds_id,
                    old_state,
                    new_state,
                    &detail.vehicle,
                    &format!("fleet state: {old_state} -> {new_state}"),
                )
                .await;
        }
    }
}
