//! Registration and heartbeat loop
//!
//! Sends `edge.register` and `node.list_request` on start with bounded
//! backoff, then ticks `edge.heartbeat` on the configured interval.
//! Heartbeats do not retry: the next tick is the retry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use shared::bus::BusClient;
use shared::protocol::payload::{EdgeHeartbeat, EdgeRegister, NodeListRequest};
use shared::protocol::{self, Address, Envelope};
use shared::{AppError, AppResult};

/// Returns the number of active (non-terminal) orders.
pub type ActiveOrderCountFn = Arc<dyn Fn() -> usize + Send + Sync>;

/// Publish attempts for register/node-list before giving up.
const PUBLISH_ATTEMPTS: u32 = 3;
/// Initial backoff between attempts; doubles each time (2s, 4s, 8s).
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);

pub struct Heartbeater {
    client: Arc<dyn BusClient>,
    station_id: String,
    version: String,
    line_ids: Vec<String>,
    /// Orders topic to publish on.
    topic: String,
    interval: Duration,
    order_count_fn: Option<ActiveOrderCountFn>,
    start_time: Mutex<Option<Instant>>,
    shutdown: CancellationToken,
}

impl Heartbeater {
    pub fn new(
        client: Arc<dyn BusClient>,
        station_id: impl Into<String>,
        version: impl Into<String>,
        line_ids: Vec<String>,
        orders_topic: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            station_id: station_id.into(),
            version: version.into(),
            line_ids,
            topic: orders_topic.into(),
            interval,
            order_count_fn: None,
            start_time: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Supply the active-order counter; absent means zero.
    pub fn with_order_count(mut self, f: ActiveOrderCountFn) -> Self {
        self.order_count_fn = Some(f);
        self
    }

    /// Record the start time, send registration + node list request, and
    /// begin the heartbeat loop.
    pub fn start(self: &Arc<Self>) {
        *self.start_time.lock().unwrap() = Some(Instant::now());
        let hb = self.clone();
        tokio::spawn(async move {
            hb.send_register().await;
            hb.send_node_list_request().await;
            hb.run().await;
        });
    }

    /// Halt the heartbeat loop. Idempotent; aborts any in-progress
    /// backoff sleep.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    fn src(&self) -> Address {
        Address::edge(&self.station_id)
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // consume the immediate tick
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("heartbeater stopped");
                    return;
                }
                _ = ticker.tick() => self.send_heartbeat().await,
            }
        }
    }

    async fn send_register(&self) {
        let hostname = std::env::var("HOSTNAME").unwrap_or_default();
        let env = match Envelope::new_data(
            protocol::SUBJECT_EDGE_REGISTER,
            self.src(),
            Address::core(""),
            &EdgeRegister {
                station_id: self.station_id.clone(),
                hostname,
                version: self.version.clone(),
                line_ids: self.line_ids.clone(),
            },
        ) {
            Ok(env) => env,
            Err(e) => {
                tracing::error!(error = %e, "heartbeater: build register failed");
                return;
            }
        };

        match self.publish_with_retry(&env, "register").await {
            Ok(()) => tracing::info!(station = %self.station_id, "sent edge.register"),
            Err(e) => tracing::error!(error = %e, "send register failed after retries"),
        }
    }

    async fn send_node_list_request(&self) {
        let env = match Envelope::new_data(
            protocol::SUBJECT_NODE_LIST_REQUEST,
            self.src(),
            Address::core(""),
            &NodeListRequest::default(),
        ) {
            Ok(env) => env,
            Err(e) => {
                tracing::error!(error = %e, "heartbeater: build node list request failed");
                return;
            }
        };

        match self.publish_with_retry(&env, "node list request").await {
            Ok(()) => tracing::info!(station = %self.station_id, "sent node.list_request"),
            Err(e) => tracing::error!(error = %e, "send node list request failed after retries"),
        }
    }

    /// Re-request the core node list on demand.
    pub async fn request_node_sync(&self) {
        self.send_node_list_request().await;
    }

    /// Publish with exponential backoff (3 attempts, 2s/4s/8s), aborting
    /// early when stop is signalled during a sleep.
    async fn publish_with_retry(&self, env: &Envelope, label: &str) -> AppResult<()> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = AppError::transport("no attempts made");

        for attempt in 1..=PUBLISH_ATTEMPTS {
            match self.client.publish_envelope(&self.topic, env).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "heartbeater: {label} attempt failed"
                    );
                    last_err = e;
                }
            }
            if attempt == PUBLISH_ATTEMPTS {
                break;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(last_err),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff *= 2;
        }
        Err(last_err)
    }

    async fn send_heartbeat(&self) {
        let uptime = self
            .start_time
            .lock()
            .unwrap()
            .map(|t| t.elapsed().as_secs() as i64)
            .unwrap_or(0);
        let orders = self.order_count_fn.as_ref().map(|f| f()).unwrap_or(0) as i64;

        let env = match Envelope::new_data(
            protocol::SUBJECT_EDGE_HEARTBEAT,
            self.src(),
            Address::core(""),
            &EdgeHeartbeat {
                station_id: self.station_id.clone(),
                uptime,
                orders,
            },
        ) {
            Ok(env) => env,
            Err(e) => {
                tracing::error!(error = %e, "heartbeater: build heartbeat failed");
                return;
            }
        };

        // No retry here: the next tick is the retry.
        if let Err(e) = self.client.publish_envelope(&self.topic, &env).await {
            tracing::warn!(error = %e, "heartbeater: send heartbeat failed");
        }
    }
}
