use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use core_server::core::logger;
use core_server::db::{DbService, OutboxRepository};
use core_server::dispatch::FleetDispatcher;
use core_server::fleet::{FleetBackend, Poller, RdsClient};
use core_server::message::TcpBusServer;
use core_server::messaging::CoreHandler;
use core_server::Config;
use shared::bus::{BusClient, MemoryBus};
use shared::outbox::OutboxDrainer;
use shared::protocol::Ingestor;

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    logger::init(&config.log_level, config.log_dir.as_deref());

    tracing::info!(station = %config.station_id, "Flowline core starting");

    // Database (outbox, edge registry, nodes, production)
    let db = match DbService::new(&config.database_path).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "open database failed");
            std::process::exit(1);
        }
    };
    let outbox = OutboxRepository::new(db.pool.clone());

    // Broker: in-process bus + TCP bridge for the edges
    let bus = MemoryBus::new();
    let broker = Arc::new(TcpBusServer::new(&config.bus_listen_addr, bus.clone()));
    if let Err(e) = broker.start().await {
        tracing::error!(error = %e, "start broker failed");
        std::process::exit(1);
    }

    // Fleet backend
    let fleet = match RdsClient::new(&config.fleet_base_url, config.fleet_timeout) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "build fleet client failed");
            std::process::exit(1);
        }
    };
    match fleet.ping().await {
        Ok(info) => tracing::info!(product = %info.product, version = %info.version,
            "fleet backend connected"),
        Err(e) => tracing::warn!(error = %e, "fleet backend not available"),
    }

    // Dispatcher + poller (mutually referential; poller attached after)
    let dispatcher = Arc::new(FleetDispatcher::new(
        outbox.clone(),
        config.station_id.clone(),
        config.dispatch_topic.clone(),
    ));
    let poller = Arc::new(Poller::new(
        fleet.clone(),
        dispatcher.clone(),
        dispatcher.clone(),
        config.fleet_poll_interval,
    ));
    dispatcher.attach_poller(poller.clone());
    poller.start();

    // Inbound handler + stale-edge sweeper
    let handler = Arc::new(CoreHandler::new(
        db.pool.clone(),
        outbox.clone(),
        config.station_id.clone(),
        config.dispatch_topic.clone(),
        dispatcher.clone(),
    ));
    handler.start();

    // Ingestor on the orders topic (core accepts all stations)
    let ingestor = Arc::new(Ingestor::new(handler.clone()));
    let mut orders_rx = bus.subscribe(&config.orders_topic);
    let ingest_shutdown = CancellationToken::new();
    let ingest_stop = ingest_shutdown.clone();
    let ingest = ingestor.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = ingest_stop.cancelled() => break,
                result = orders_rx.recv() => match result {
                    Ok(data) => ingest.handle_raw(&data).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "orders subscription lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
    tracing::info!(topic = %config.orders_topic, "ingestor listening");

    // Outbox drainer publishes replies and lifecycle messages
    let drainer = OutboxDrainer::new(
        Arc::new(outbox.clone()),
        Arc::new(bus.clone()),
        config.outbox_drain_interval,
    );
    drainer.start();

    tracing::info!("Flowline core ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "signal wait failed");
    }

    tracing::info!("shutting down");
    handler.stop();
    poller.stop();
    drainer.stop();
    ingest_shutdown.cancel();
    broker.stop();
}
