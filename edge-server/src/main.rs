use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use edge_server::core::logger;
use edge_server::db::{DbService, OutboxRepository};
use edge_server::engine::{Engine, HourlyTracker};
use edge_server::messaging::{EdgeHandler, Heartbeater};
use edge_server::Config;
use shared::bus::{BusClient, TcpBusClient};
use shared::outbox::OutboxDrainer;
use shared::protocol::{Ingestor, RawHeader};

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    logger::init(&config.log_level, config.log_dir.as_deref());

    tracing::info!(
        station = %config.station_id,
        node = %config.node_id,
        "Flowline edge starting"
    );

    // Database (outbox, hourly buckets, shifts)
    let db = match DbService::new(&config.database_path).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "open database failed");
            std::process::exit(1);
        }
    };
    let outbox = OutboxRepository::new(db.pool.clone());

    // Engine: event channel, counter tracker, active orders
    let engine = Engine::new(config.clone(), outbox.clone());

    // Bus client (reconnects on its own; the outbox rides out the gaps)
    let bus = Arc::new(TcpBusClient::new(&config.bus_addr));
    bus.start();

    // Outbox drainer
    let drainer = OutboxDrainer::new(
        Arc::new(outbox.clone()),
        bus.clone(),
        config.outbox_drain_interval,
    );
    drainer.start();

    // Hourly tracker consumes counter deltas from the engine
    let shutdown = CancellationToken::new();
    let tracker = HourlyTracker::new(db.pool.clone(), &config.timezone);
    let tracker_events = engine.subscribe_events();
    let tracker_shutdown = shutdown.clone();
    tokio::spawn(async move { tracker.run(tracker_events, tracker_shutdown).await });

    // Ingestor on the dispatch topic, filtered to this node
    let station_id = config.station_id.clone();
    let node_id = config.node_id.clone();
    let handler = Arc::new(EdgeHandler::new(engine.clone()));
    let ingestor = Arc::new(Ingestor::new(handler).with_filter(Arc::new(
        move |hdr: &RawHeader| {
            (hdr.dst.station.is_empty() || hdr.dst.station == station_id)
                && (hdr.dst.node.is_empty() || hdr.dst.node == "*" || hdr.dst.node == node_id)
        },
    )));

    let mut dispatch_rx = bus.subscribe(&config.dispatch_topic);
    let ingest_shutdown = shutdown.clone();
    let ingest = ingestor.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = ingest_shutdown.cancelled() => break,
                result = dispatch_rx.recv() => match result {
                    Ok(data) => ingest.handle_raw(&data).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "dispatch subscription lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
    tracing::info!(topic = %config.dispatch_topic, node = %config.node_id, "ingestor listening");

    // Heartbeater: registration + node list request + periodic heartbeat
    let count_engine = engine.clone();
    let heartbeater = Arc::new(
        Heartbeater::new(
            bus.clone(),
            config.station_id.clone(),
            env!("CARGO_PKG_VERSION"),
            config.line_ids.clone(),
            config.orders_topic.clone(),
            config.heartbeat_interval,
        )
        .with_order_count(Arc::new(move || count_engine.active_order_count())),
    );
    heartbeater.start();

    tracing::info!("Flowline edge ready");

    // Wait for shutdown signal
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "signal wait failed");
    }

    tracing::info!("shutting down");
    heartbeater.stop();
    drainer.stop();
    shutdown.cancel();
    bus.stop();
}
