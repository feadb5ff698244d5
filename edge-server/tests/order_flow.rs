//! Edge-side order flow: outbox → bus → dispatch handling.

use std::sync::Arc;
use std::time::Duration;

use edge_server::db::OutboxRepository;
use edge_server::engine::Engine;
use edge_server::messaging::EdgeHandler;
use edge_server::Config;
use shared::bus::{BusClient, MemoryBus};
use shared::outbox::OutboxDrainer;
use shared::protocol::payload::{OrderAck, OrderDelivered};
use shared::protocol::{Address, Envelope, Ingestor, MessageType, RawHeader};
use sqlx::sqlite::SqlitePoolOptions;

async fn test_outbox() -> OutboxRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("apply migrations");
    OutboxRepository::new(pool)
}

fn test_config() -> Config {
    let mut config = Config::from_env();
    config.station_id = "edge-01".to_string();
    config.node_id = "edge-01".to_string();
    config.orders_topic = "orders".to_string();
    config.dispatch_topic = "dispatch".to_string();
    config
}

#[tokio::test]
async fn order_request_reaches_bus_and_ack_updates_state() {
    let outbox = test_outbox().await;
    let engine = Engine::new(test_config(), outbox.clone());
    let bus = Arc::new(MemoryBus::new());
    let mut orders_rx = bus.subscribe("orders");

    // Drain the outbox onto the bus every 10ms
    let drainer = OutboxDrainer::new(
        Arc::new(outbox),
        bus.clone(),
        Duration::from_millis(10),
    );
    drainer.start();

    let uuid = engine
        .submit_order("retrieve", "staging-1", "line-3", "bin", 1)
        .await
        .unwrap();

    // The request appears on the orders topic
    let raw = tokio::time::timeout(Duration::from_secs(2), orders_rx.recv())
        .await
        .expect("drain within deadline")
        .unwrap();
    let env = Envelope::decode(&raw).unwrap();
    assert_eq!(env.msg_type, "order.request");
    assert_eq!(env.src.station, "edge-01");

    // Core's ack comes back on the dispatch topic
    let station = "edge-01".to_string();
    let node = "edge-01".to_string();
    let handler = Arc::new(EdgeHandler::new(engine.clone()));
    let ingestor = Ingestor::new(handler).with_filter(Arc::new(move |hdr: &RawHeader| {
        (hdr.dst.station.is_empty() || hdr.dst.station == station)
            && (hdr.dst.node.is_empty() || hdr.dst.node == "*" || hdr.dst.node == node)
    }));

    let ack = Envelope::new_reply(
        MessageType::OrderAck,
        Address::core("core-01"),
        Address::edge("edge-01"),
        &env.id,
        &OrderAck {
            order_uuid: uuid.clone(),
            order_id: 1,
            rds_order_id: "RDS-1".to_string(),
            status: "accepted".to_string(),
        },
    )
    .unwrap();
    ingestor.handle_raw(&ack.encode().unwrap()).await;
    assert_eq!(engine.active_order_count(), 1);

    // Delivery closes the order
    let delivered = Envelope::new(
        MessageType::OrderDelivered,
        Address::core("core-01"),
        Address::edge("edge-01"),
        &OrderDelivered {
            order_uuid: uuid,
            delivered_at: None,
        },
    )
    .unwrap();
    ingestor.handle_raw(&delivered.encode().unwrap()).await;
    assert_eq!(engine.active_order_count(), 0);

    drainer.stop();
}

#[tokio::test]
async fn messages_for_other_stations_are_filtered() {
    let outbox = test_outbox().await;
    let engine = Engine::new(test_config(), outbox);

    let station = "edge-01".to_string();
    let node = "edge-01".to_string();
    let handler = Arc::new(EdgeHandler::new(engine.clone()));
    let ingestor = Ingestor::new(handler).with_filter(Arc::new(move |hdr: &RawHeader| {
        (hdr.dst.station.is_empty() || hdr.dst.station == station)
            && (hdr.dst.node.is_empty() || hdr.dst.node == "*" || hdr.dst.node == node)
    }));

    // Addressed to a different station: silently dropped
    let foreign = Envelope::new(
        MessageType::OrderAck,
        Address::core("core-01"),
        Address::edge("edge-02"),
        &OrderAck {
            order_uuid: "u-x".to_string(),
            order_id: 9,
            rds_order_id: String::new(),
            status: String::new(),
        },
    )
    .unwrap();
    ingestor.handle_raw(&foreign.encode().unwrap()).await;

    assert_eq!(
        ingestor
            .stats()
            .filtered
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    assert_eq!(engine.active_order_count(), 0);
}
