//! Handler for inbound orders-topic messages
//!
//! Registration, heartbeat, node list and production reports are handled
//! directly against the database; order messages delegate to the
//! dispatcher. Every reply goes out through the core outbox on the
//! dispatch topic, so a persistence failure skips the reply rather than
//! corrupting state — the edge-side outbox retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use shared::outbox::OutboxStore;
use shared::protocol::payload::*;
use shared::protocol::{self, Address, Envelope, MessageHandler};

use crate::db::{edges, nodes, production, OutboxRepository};
use crate::dispatch::Dispatcher;

/// Sweeper tick.
const STALE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Heartbeat age past which an edge is marked stale.
const STALE_THRESHOLD: Duration = Duration::from_secs(180);

pub struct CoreHandler {
    pool: SqlitePool,
    outbox: OutboxRepository,
    station_id: String,
    dispatch_topic: String,
    dispatcher: Arc<dyn Dispatcher>,
    shutdown: CancellationToken,
}

impl CoreHandler {
    pub fn new(
        pool: SqlitePool,
        outbox: OutboxRepository,
        station_id: impl Into<String>,
        dispatch_topic: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            pool,
            outbox,
            station_id: station_id.into(),
            dispatch_topic: dispatch_topic.into(),
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    /// Begin the stale-edge sweeper loop.
    pub fn start(self: &Arc<Self>) {
        let handler = self.clone();
        tokio::spawn(async move {
            tracing::info!("stale-edge sweeper started");
            let mut ticker = tokio::time::interval(STALE_CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = handler.shutdown.cancelled() => break,
                    _ = ticker.tick() => handler.sweep_stale_edges().await,
                }
            }
            tracing::info!("stale-edge sweeper stopped");
        });
    }

    /// Halt the sweeper. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    fn src(&self) -> Address {
        Address::core(&self.station_id)
    }

    /// Encode a reply and enqueue it on the dispatch topic.
    async fn enqueue_reply(&self, env: &Envelope) {
        let bytes = match env.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "core handler: encode reply failed");
                return;
            }
        };
        if let Err(e) = self
            .outbox
            .enqueue(&self.dispatch_topic, &bytes, &env.msg_type)
            .await
        {
            tracing::error!(error = %e, msg_type = %env.msg_type,
                "core handler: enqueue reply failed");
        }
    }

    async fn handle_edge_register(&self, env: &Envelope, p: &EdgeRegister) {
        tracing::info!(
            station = %p.station_id,
            hostname = %p.hostname,
            version = %p.version,
            lines = ?p.line_ids,
            "edge registered"
        );

        if let Err(e) =
            edges::register_edge(&self.pool, &p.station_id, &p.hostname, &p.version, &p.line_ids)
                .await
        {
            tracing::error!(station = %p.station_id, error = %e, "register edge failed");
            return; // no reply on persistence failure; the edge retries
        }

        match Envelope::new_data_reply(
            protocol::SUBJECT_EDGE_REGISTERED,
            self.src(),
            Address::edge(&p.station_id),
            &env.id,
            &EdgeRegistered {
                station_id: p.station_id.clone(),
                message: "registered".to_string(),
            },
        ) {
            Ok(reply) => self.enqueue_reply(&reply).await,
            Err(e) => tracing::error!(error = %e, "build registered reply failed"),
        }
    }

    async fn handle_edge_heartbeat(&self, env: &Envelope, p: &EdgeHeartbeat) {
        if let Err(e) = edges::update_heartbeat(&self.pool, &p.station_id).await {
            tracing::warn!(station = %p.station_id, error = %e, "heartbeat update failed");
            return;
        }
        tracing::debug!(station = %p.station_id, uptime = p.uptime, orders = p.orders, "heartbeat");

        match Envelope::new_data_reply(
            protocol::SUBJECT_EDGE_HEARTBEAT_ACK,
            self.src(),
            Address::edge(&p.station_id),
            &env.id,
            &EdgeHeartbeatAck {
                station_id: p.station_id.clone(),
                server_ts: Utc::now(),
            },
        ) {
            Ok(reply) => self.enqueue_reply(&reply).await,
            Err(e) => tracing::error!(error = %e, "build heartbeat ack failed"),
        }
    }

    async fn handle_node_list_request(&self, env: &Envelope) {
        let node_rows = match nodes::list_nodes(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(station = %env.src.station, error = %e, "list nodes failed");
                return;
            }
        };
        let infos: Vec<NodeInfo> = node_rows
            .into_iter()
            .map(|n| NodeInfo {
                name: n.name,
                node_type: n.node_type,
            })
            .collect();
        let count = infos.len();

        match Envelope::new_data_reply(
            protocol::SUBJECT_NODE_LIST_RESPONSE,
            self.src(),
            Address::edge(&env.src.station),
            &env.id,
            &NodeListResponse { nodes: infos },
        ) {
            Ok(reply) => {
                self.enqueue_reply(&reply).await;
                tracing::info!(station = %env.src.station, nodes = count, "sent node list");
            }
            Err(e) => tracing::error!(error = %e, "build node list reply failed"),
        }
    }

    async fn handle_production_report(&self, env: &Envelope, p: &ProductionReport) {
        tracing::info!(station = %p.station_id, entries = p.reports.len(), "production report");

        let mut accepted = 0i64;
        for entry in &p.reports {
            if entry.cat_id.is_empty() || entry.count <= 0 {
                continue;
            }
            if let Err(e) = production::increment_produced(&self.pool, &entry.cat_id, entry.count).await
            {
                tracing::error!(cat_id = %entry.cat_id, error = %e, "increment produced failed");
                continue;
            }
            if let Err(e) =
                production::log_production(&self.pool, &entry.cat_id, &p.station_id, entry.count)
                    .await
            {
                tracing::error!(cat_id = %entry.cat_id, error = %e, "log production failed");
            }
            accepted += 1;
        }

        match Envelope::new_data_reply(
            protocol::SUBJECT_PRODUCTION_REPORT_ACK,
            self.src(),
            Address::edge(&p.station_id),
            &env.id,
            &ProductionReportAck {
                station_id: p.station_id.clone(),
                accepted,
            },
        ) {
            Ok(reply) => self.enqueue_reply(&reply).await,
            Err(e) => tracing::error!(error = %e, "build production report ack failed"),
        }
    }

    /// One sweep: flip overdue edges to stale and notify them.
    async fn sweep_stale_edges(&self) {
        let stale = match edges::mark_stale_edges(&self.pool, STALE_THRESHOLD).await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::error!(error = %e, "mark stale edges failed");
                return;
            }
        };

        for station_id in stale {
            tracing::warn!(station = %station_id, "edge marked stale");
            match Envelope::new_data(
                protocol::SUBJECT_EDGE_STALE,
                self.src(),
                Address::edge(&station_id),
                &EdgeStale {
                    station_id: station_id.clone(),
                    reason: "heartbeat timeout".to_string(),
                },
            ) {
                Ok(env) => self.enqueue_reply(&env).await,
                Err(e) => tracing::error!(station = %station_id, error = %e,
                    "build stale notification failed"),
            }
        }
    }
}

#[async_trait]
impl MessageHandler for CoreHandler {
    async fn handle_data(&self, env: &Envelope, p: &Data) {
        match p.subject.as_str() {
            protocol::SUBJECT_EDGE_REGISTER => {
                match serde_json::from_value::<EdgeRegister>(p.body.clone()) {
                    Ok(reg) => self.handle_edge_register(env, &reg).await,
                    Err(e) => tracing::warn!(error = %e, "decode edge register body"),
                }
            }
            protocol::SUBJECT_EDGE_HEARTBEAT => {
                match serde_json::from_value::<EdgeHeartbeat>(p.body.clone()) {
                    Ok(hb) => self.handle_edge_heartbeat(env, &hb).await,
                    Err(e) => tracing::warn!(error = %e, "decode edge heartbeat body"),
                }
            }
            protocol::SUBJECT_NODE_LIST_REQUEST => self.handle_node_list_request(env).await,
            protocol::SUBJECT_PRODUCTION_REPORT => {
                match serde_json::from_value::<ProductionReport>(p.body.clone()) {
                    Ok(rpt) => self.handle_production_report(env, &rpt).await,
                    Err(e) => tracing::warn!(error = %e, "decode production report body"),
                }
            }
            other => tracing::warn!(subject = %other, "unhandled data subject"),
        }
    }

    async fn handle_order_request(&self, env: &Envelope, p: &OrderRequest) {
        tracing::info!(station = %env.src.station, order_uuid = %p.order_uuid,
            order_type = %p.order_type, "order request");
        self.dispatcher.handle_order_request(env, p).await;
    }

    async fn handle_order_cancel(&self, env: &Envelope, p: &OrderCancel) {
        tracing::info!(station = %env.src.station, order_uuid = %p.order_uuid, "order cancel");
        self.dispatcher.handle_order_cancel(env, p).await;
    }

    async fn handle_order_receipt(&self, env: &Envelope, p: &OrderReceipt) {
        tracing::info!(station = %env.src.station, order_uuid = %p.order_uuid, "delivery receipt");
        self.dispatcher.handle_order_receipt(env, p).await;
    }

    async fn handle_order_redirect(&self, env: &Envelope, p: &OrderRedirect) {
        tracing::info!(station = %env.src.station, order_uuid = %p.order_uuid,
            new_node = %p.new_delivery_node, "order redirect");
        self.dispatcher.handle_order_redirect(env, p).await;
    }

    async fn handle_order_storage_waybill(&self, env: &Envelope, p: &OrderStorageWaybill) {
        tracing::info!(station = %env.src.station, order_uuid = %p.order_uuid, "storage waybill");
        self.dispatcher.handle_order_storage_waybill(env, p).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use shared::protocol::Ingestor;
    use std::sync::Mutex;

    /// Dispatcher that records which methods fired.
    #[derive(Default)]
    struct RecordingDispatcher {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn handle_order_request(&self, _env: &Envelope, p: &OrderRequest) {
            self.calls.lock().unwrap().push(format!("request:{}", p.order_uuid));
        }
        async fn handle_order_cancel(&self, _env: &Envelope, p: &OrderCancel) {
            self.calls.lock().unwrap().push(format!("cancel:{}", p.order_uuid));
        }
        async fn handle_order_receipt(&self, _env: &Envelope, p: &OrderReceipt) {
            self.calls.lock().unwrap().push(format!("receipt:{}", p.order_uuid));
        }
        async fn handle_order_redirect(&self, _env: &Envelope, p: &OrderRedirect) {
            self.calls.lock().unwrap().push(format!("redirect:{}", p.order_uuid));
        }
        async fn handle_order_storage_waybill(&self, _env: &Envelope, p: &OrderStorageWaybill) {
            self.calls.lock().unwrap().push(format!("waybill:{}", p.order_uuid));
        }
    }

    async fn setup() -> (Arc<CoreHandler>, Arc<RecordingDispatcher>, SqlitePool, OutboxRepository) {
        let pool = test_pool().await;
        let outbox = OutboxRepository::new(pool.clone());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let handler = Arc::new(CoreHandler::new(
            pool.clone(),
            outbox.clone(),
            "core-01",
            "dispatch",
            dispatcher.clone(),
        ));
        (handler, dispatcher, pool, outbox)
    }

    fn register_envelope(station: &str) -> Envelope {
        Envelope::new_data(
            protocol::SUBJECT_EDGE_REGISTER,
            Address::edge(station),
            Address::core(""),
            &EdgeRegister {
                station_id: station.to_string(),
                hostname: "host-a".to_string(),
                version: "0.3.0".to_string(),
                line_ids: vec!["line-1".to_string()],
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_persists_and_replies() {
        let (handler, _, pool, outbox) = setup().await;
        let ingestor = Ingestor::new(handler);

        let env = register_envelope("edge-01");
        ingestor.handle_raw(&env.encode().unwrap()).await;

        let edge_list = edges::list_edges(&pool).await.unwrap();
        assert_eq!(edge_list.len(), 1);
        assert_eq!(edge_list[0].hostname, "host-a");

        let pending = outbox.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].topic, "dispatch");

        let reply = Envelope::decode(&pending[0].payload).unwrap();
        assert_eq!(reply.reply_to.as_deref(), Some(env.id.as_str()));
        let data: Data = reply.payload_as().unwrap();
        assert_eq!(data.subject, protocol::SUBJECT_EDGE_REGISTERED);
        let reg: EdgeRegistered = serde_json::from_value(data.body).unwrap();
        assert_eq!(reg.message, "registered");
    }

    #[tokio::test]
    async fn test_heartbeat_touches_last_seen_and_acks() {
        let (handler, _, pool, outbox) = setup().await;
        let ingestor = Ingestor::new(handler);

        ingestor
            .handle_raw(&register_envelope("edge-01").encode().unwrap())
            .await;
        let before = edges::list_edges(&pool).await.unwrap()[0].last_seen;

        let hb = Envelope::new_data(
            protocol::SUBJECT_EDGE_HEARTBEAT,
            Address::edge("edge-01"),
            Address::core(""),
            &EdgeHeartbeat {
                station_id: "edge-01".to_string(),
                uptime: 120,
                orders: 1,
            },
        )
        .unwrap();
        ingestor.handle_raw(&hb.encode().unwrap()).await;

        let after = edges::list_edges(&pool).await.unwrap()[0].last_seen;
        assert!(after >= before);

        let pending = outbox.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        let ack = Envelope::decode(&pending[1].payload).unwrap();
        let data: Data = ack.payload_as().unwrap();
        assert_eq!(data.subject, protocol::SUBJECT_EDGE_HEARTBEAT_ACK);
    }

    #[tokio::test]
    async fn test_heartbeat_from_unknown_station_gets_no_ack() {
        let (handler, _, _, outbox) = setup().await;
        let ingestor = Ingestor::new(handler);

        let hb = Envelope::new_data(
            protocol::SUBJECT_EDGE_HEARTBEAT,
            Address::edge("edge-99"),
            Address::core(""),
            &EdgeHeartbeat {
                station_id: "edge-99".to_string(),
                uptime: 1,
                orders: 0,
            },
        )
        .unwrap();
        ingestor.handle_raw(&hb.encode().unwrap()).await;

        assert!(outbox.list_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_list_reply() {
        let (handler, _, pool, outbox) = setup().await;
        nodes::upsert_node(&pool, "line-3", "line", true).await.unwrap();
        nodes::upsert_node(&pool, "staging-1", "staging", true).await.unwrap();
        let ingestor = Ingestor::new(handler);

        let req = Envelope::new_data(
            protocol::SUBJECT_NODE_LIST_REQUEST,
            Address::edge("edge-01"),
            Address::core(""),
            &NodeListRequest::default(),
        )
        .unwrap();
        ingestor.handle_raw(&req.encode().unwrap()).await;

        let pending = outbox.list_pending(10).await.unwrap();
        let reply = Envelope::decode(&pending[0].payload).unwrap();
        assert_eq!(reply.dst.station, "edge-01");
        let data: Data = reply.payload_as().unwrap();
        let resp: NodeListResponse = serde_json::from_value(data.body).unwrap();
        assert_eq!(resp.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_production_report_counts_valid_entries() {
        let (handler, _, pool, outbox) = setup().await;
        let ingestor = Ingestor::new(handler);

        let rpt = Envelope::new_data(
            protocol::SUBJECT_PRODUCTION_REPORT,
            Address::edge("edge-01"),
            Address::core(""),
            &ProductionReport {
                station_id: "edge-01".to_string(),
                reports: vec![
                    ProductionReportEntry {
                        cat_id: "widget-a".to_string(),
                        count: 12,
                    },
                    ProductionReportEntry {
                        cat_id: String::new(),
                        count: 5,
                    },
                    ProductionReportEntry {
                        cat_id: "widget-b".to_string(),
                        count: 0,
                    },
                ],
            },
        )
        .unwrap();
        ingestor.handle_raw(&rpt.encode().unwrap()).await;

        assert_eq!(production::get_produced(&pool, "widget-a").await.unwrap(), 12);
        assert_eq!(production::get_produced(&pool, "widget-b").await.unwrap(), 0);

        let pending = outbox.list_pending(10).await.unwrap();
        let reply = Envelope::decode(&pending[0].payload).unwrap();
        let data: Data = reply.payload_as().unwrap();
        let ack: ProductionReportAck = serde_json::from_value(data.body).unwrap();
        assert_eq!(ack.accepted, 1);
    }

    #[tokio::test]
    async fn test_order_messages_delegate_to_dispatcher() {
        let (handler, dispatcher, _, _) = setup().await;
        let ingestor = Ingestor::new(handler);

        let env = Envelope::new(
            shared::MessageType::OrderRequest,
            Address::edge("edge-01"),
            Address::core(""),
            &OrderRequest {
                order_uuid: "u-1".to_string(),
                order_type: "retrieve".to_string(),
                source_node: "a".to_string(),
                delivery_node: "b".to_string(),
                payload_desc: String::new(),
                quantity: 1,
            },
        )
        .unwrap();
        ingestor.handle_raw(&env.encode().unwrap()).await;

        let cancel = Envelope::new(
            shared::MessageType::OrderCancel,
            Address::edge("edge-01"),
            Address::core(""),
            &OrderCancel {
                order_uuid: "u-1".to_string(),
                reason: String::new(),
            },
        )
        .unwrap();
        ingestor.handle_raw(&cancel.encode().unwrap()).await;

        let calls = dispatcher.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["request:u-1", "cancel:u-1"]);
    }

    #[tokio::test]
    async fn test_stale_sweep_notifies_once() {
        let (handler, _, pool, outbox) = setup().await;
        edges::register_edge(&pool, "edge-01", "", "", &[]).await.unwrap();

        // Force the edge overdue by back-dating last_seen.
        sqlx::query("UPDATE edges SET last_seen = ? WHERE station_id = 'edge-01'")
            .bind(Utc::now() - chrono::Duration::seconds(600))
            .execute(&pool)
            .await
            .unwrap();

        handler.sweep_stale_edges().await;
        handler.sweep_stale_edges().await; // second sweep: no duplicate

        let pending = outbox.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        let env = Envelope::decode(&pending[0].payload).unwrap();
        let data: Data = env.payload_as().unwrap();
        assert_eq!(data.subject, protocol::SUBJECT_EDGE_STALE);
        let stale: EdgeStale = serde_json::from_value(data.body).unwrap();
        assert_eq!(stale.station_id, "edge-01");
        assert_eq!(stale.reason, "heartbeat timeout");
    }
}
