//! Full edge↔core loop over the TCP broker: registration, heartbeat and
//! order round trips with the real wire format.

use std::sync::Arc;
use std::time::Duration;

use core_server::db::{nodes, OutboxRepository};
use core_server::dispatch::FleetDispatcher;
use core_server::fleet::{FleetBackend, OrderDetail, PingResponse, Poller};
use core_server::message::TcpBusServer;
use core_server::messaging::CoreHandler;
use shared::bus::{BusClient, MemoryBus, TcpBusClient};
use shared::outbox::OutboxDrainer;
use shared::protocol::payload::{Data, EdgeRegister, NodeListRequest, OrderRequest};
use shared::protocol::{self, Address, Envelope, Ingestor, MessageType};
use shared::AppResult;
use sqlx::SqlitePool;

struct IdleFleet;

#[async_trait::async_trait]
impl FleetBackend for IdleFleet {
    fn name(&self) -> &str {
        "idle"
    }

    async fn ping(&self) -> AppResult<PingResponse> {
        Ok(PingResponse {
            product: "idle".to_string(),
            version: "0".to_string(),
        })
    }

    async fn order_details(&self, _rds_order_id: &str) -> AppResult<OrderDetail> {
        Err(shared::AppError::fleet("no fleet in this test"))
    }
}

async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("apply migrations");
    pool
}

/// Boot a complete core: broker, handler, drainer, dispatcher.
async fn boot_core(pool: SqlitePool) -> (String, MemoryBus, OutboxDrainer) {
    let outbox = OutboxRepository::new(pool.clone());
    let bus = MemoryBus::new();
    let broker = Arc::new(TcpBusServer::new("127.0.0.1:0", bus.clone()));
    let addr = broker.start().await.unwrap();

    let dispatcher = Arc::new(FleetDispatcher::new(
        outbox.clone(),
        "core-01",
        "dispatch",
    ));
    let poller = Arc::new(Poller::new(
        Arc::new(IdleFleet),
        dispatcher.clone(),
        dispatcher.clone(),
        Duration::from_secs(3600),
    ));
    dispatcher.attach_poller(poller);

    let handler = Arc::new(CoreHandler::new(
        pool,
        outbox.clone(),
        "core-01",
        "dispatch",
        dispatcher,
    ));

    let ingestor = Arc::new(Ingestor::new(handler));
    let mut orders_rx = bus.subscribe("orders");
    tokio::spawn(async move {
        while let Ok(data) = orders_rx.recv().await {
            ingestor.handle_raw(&data).await;
        }
    });

    let drainer = OutboxDrainer::new(
        Arc::new(outbox),
        Arc::new(bus.clone()),
        Duration::from_millis(10),
    );
    drainer.start();

    (addr, bus, drainer)
}

async fn connect_edge(addr: &str) -> (TcpBusClient, tokio::sync::broadcast::Receiver<Vec<u8>>) {
    let edge = TcpBusClient::new(addr);
    let dispatch_rx = edge.subscribe("dispatch");
    edge.start();
    for _ in 0..100 {
        if edge.is_connected() {
            return (edge, dispatch_rx);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("edge never connected");
}

/// Receive dispatch-topic envelopes until one matches, within a deadline.
async fn expect_dispatch<F>(
    rx: &mut tokio::sync::broadcast::Receiver<Vec<u8>>,
    mut matches: F,
) -> Envelope
where
    F: FnMut(&Envelope) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let raw = rx.recv().await.expect("dispatch channel open");
            if let Ok(env) = Envelope::decode(&raw) {
                if matches(&env) {
                    return env;
                }
            }
        }
    })
    .await
    .expect("reply within deadline")
}

#[tokio::test]
async fn register_and_node_list_round_trip() {
    let pool = test_pool().await;
    nodes::upsert_node(&pool, "line-3", "line", true).await.unwrap();
    let (addr, _bus, drainer) = boot_core(pool.clone()).await;
    let (edge, mut dispatch_rx) = connect_edge(&addr).await;

    // Register
    let register = Envelope::new_data(
        protocol::SUBJECT_EDGE_REGISTER,
        Address::edge("edge-01"),
        Address::core(""),
        &EdgeRegister {
            station_id: "edge-01".to_string(),
            hostname: "host-a".to_string(),
            version: "0.3.0".to_string(),
            line_ids: vec!["line-1".to_string()],
        },
    )
    .unwrap();
    edge.publish_envelope("orders", &register).await.unwrap();

    let reply = expect_dispatch(&mut dispatch_rx, |env| {
        env.payload_as::<Data>()
            .map(|d| d.subject == protocol::SUBJECT_EDGE_REGISTERED)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(reply.reply_to.as_deref(), Some(register.id.as_str()));
    assert_eq!(reply.dst.station, "edge-01");

    // Node list
    let request = Envelope::new_data(
        protocol::SUBJECT_NODE_LIST_REQUEST,
        Address::edge("edge-01"),
        Address::core(""),
        &NodeListRequest::default(),
    )
    .unwrap();
    edge.publish_envelope("orders", &request).await.unwrap();

    let reply = expect_dispatch(&mut dispatch_rx, |env| {
        env.payload_as::<Data>()
            .map(|d| d.subject == protocol::SUBJECT_NODE_LIST_RESPONSE)
            .unwrap_or(false)
    })
    .await;
    let data: Data = reply.payload_as().unwrap();
    let body: shared::protocol::payload::NodeListResponse =
        serde_json::from_value(data.body).unwrap();
    assert_eq!(body.nodes.len(), 1);
    assert_eq!(body.nodes[0].name, "line-3");

    edge.stop();
    drainer.stop();
}

#[tokio::test]
async fn order_request_is_acked_over_the_wire() {
    let pool = test_pool().await;
    let (addr, _bus, drainer) = boot_core(pool).await;
    let (edge, mut dispatch_rx) = connect_edge(&addr).await;

    let request = Envelope::new(
        MessageType::OrderRequest,
        Address::edge("edge-01"),
        Address::core(""),
        &OrderRequest {
            order_uuid: "u-wire-1".to_string(),
            order_type: "retrieve".to_string(),
            source_node: "staging-1".to_string(),
            delivery_node: "line-3".to_string(),
            payload_desc: String::new(),
            quantity: 2,
        },
    )
    .unwrap();
    edge.publish_envelope("orders", &request).await.unwrap();

    let reply = expect_dispatch(&mut dispatch_rx, |env| env.msg_type == "order.ack").await;
    let ack: shared::protocol::payload::OrderAck = reply.payload_as().unwrap();
    assert_eq!(ack.order_uuid, "u-wire-1");
    assert_eq!(ack.status, "accepted");
    assert!(ack.rds_order_id.starts_with("RDS-"));

    edge.stop();
    drainer.stop();
}
