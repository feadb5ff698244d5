//! TCP side of the broker

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use shared::bus::{read_frame, write_frame, BusClient, MemoryBus};
use shared::{AppError, AppResult};

/// Accepts edge connections and bridges their frames onto the in-process
/// bus.
pub struct TcpBusServer {
    listen_addr: String,
    bus: MemoryBus,
    shutdown: CancellationToken,
}

impl TcpBusServer {
    pub fn new(listen_addr: impl Into<String>, bus: MemoryBus) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            bus,
            shutdown: CancellationToken::new(),
        }
    }

    /// Bind and spawn the accept loop. Returns the bound address (useful
    /// when the configured port is 0).
    pub async fn start(self: &Arc<Self>) -> AppResult<String> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| AppError::transport(format!("bind {}: {e}", self.listen_addr)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AppError::transport(format!("local addr: {e}")))?
            .to_string();
        tracing::info!(addr = %local_addr, "broker listening");

        let server = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = server.shutdown.cancelled() => break,
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                tracing::info!(peer = %peer, "edge connected");
                                let server = server.clone();
                                tokio::spawn(async move {
                                    server.serve_client(stream).await;
                                    tracing::info!(peer = %peer, "edge disconnected");
                                });
                            }
                            Err(e) => tracing::warn!(error = %e, "accept failed"),
                        }
                    }
                }
            }
            tracing::info!("broker stopped");
        });

        Ok(local_addr)
    }

    /// Stop accepting and drop existing connections. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Pump one client: inbound frames publish onto the bus, every bus
    /// frame is forwarded out. Read and write run on separate tasks so a
    /// tap burst can never cancel a half-read inbound frame.
    async fn serve_client(&self, stream: TcpStream) {
        let (mut reader, mut writer) = stream.into_split();
        let mut tap = self.bus.tap();
        let shutdown = self.shutdown.clone();

        let writer_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    outbound = tap.recv() => match outbound {
                        Ok((topic, payload)) => {
                            if write_frame(&mut writer, &topic, &payload).await.is_err() {
                                return;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "broker client lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                inbound = read_frame(&mut reader) => {
                    match inbound {
                        Ok(frame) => {
                            if let Err(e) = self.bus.publish(&frame.topic, &frame.payload).await {
                                tracing::warn!(topic = %frame.topic, error = %e,
                                    "broker publish failed");
                            }
                        }
                        Err(_) => break, // peer closed or stream corrupt
                    }
                }
            }
        }

        writer_task.abort();
    }
}
