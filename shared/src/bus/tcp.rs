//! TCP bus client
//!
//! Connects to the broker hosted by core-server, maintains a reconnecting
//! read loop, and routes inbound frames to per-topic broadcast channels.
//! Outbound publishes go straight down the socket; when the socket is
//! gone they fail fast and the outbox carries the durability.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use super::{frame, BusClient, SUBSCRIBE_CAPACITY};
use crate::error::{AppError, AppResult};

/// Delay between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct TcpBusClient {
    addr: String,
    topics: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl TcpBusClient {
    /// Create a client for the given broker address. No I/O happens until
    /// [`start`](Self::start).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            topics: Arc::new(DashMap::new()),
            writer: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the connect/read/reconnect loop.
    pub fn start(&self) {
        let client = self.clone();
        tokio::spawn(async move { client.run().await });
    }

    /// Stop the connection loop. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = TcpStream::connect(&self.addr) => {
                    match result {
                        Ok(stream) => {
                            tracing::info!(addr = %self.addr, "bus: connected");
                            self.serve_connection(stream).await;
                            tracing::warn!(addr = %self.addr, "bus: connection lost");
                        }
                        Err(e) => {
                            tracing::warn!(addr = %self.addr, error = %e, "bus: connect failed");
                        }
                    }
                }
            }

            self.connected.store(false, Ordering::SeqCst);
            *self.writer.lock().await = None;

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("bus: client stopped");
    }

    /// Read frames until the socket dies or shutdown is signalled.
    async fn serve_connection(&self, stream: TcpStream) {
        let (mut reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                result = frame::read_frame(&mut reader) => {
                    match result {
                        Ok(f) => {
                            if let Some(tx) = self.topics.get(&f.topic) {
                                let _ = tx.send(f.payload);
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "bus: read loop ended");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBE_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl BusClient for TcpBusClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> AppResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(AppError::not_connected)?;

        if let Err(e) = frame::write_frame(writer, topic, payload).await {
            // The read loop will notice the dead socket and reconnect;
            // flip the advisory flag now so the drainer skips its tick.
            self.connected.store(false, Ordering::SeqCst);
            *guard = None;
            return Err(e);
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender(topic).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_publish_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Echo broker: reads one frame, sends one frame back on `dispatch`.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = stream.into_split();
            let f = frame::read_frame(&mut reader).await.unwrap();
            assert_eq!(f.topic, "orders");
            frame::write_frame(&mut writer, "dispatch", &f.payload)
                .await
                .unwrap();
        });

        let client = TcpBusClient::new(&addr);
        let mut rx = client.subscribe("dispatch");
        client.start();

        // Wait for the connection to come up.
        for _ in 0..50 {
            if client.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(client.is_connected());

        client.publish("orders", b"ping").await.unwrap();
        let payload = rx.recv().await.unwrap();
        assert_eq!(payload, b"ping");

        client.stop();
    }

    #[tokio::test]
    async fn test_publish_without_connection_fails() {
        let client = TcpBusClient::new("127.0.0.1:1"); // nothing listening
        let err = client.publish("orders", b"x").await.unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::NotConnected);
    }

    #[tokio::test]
    async fn test_disconnect_flips_connected_flag() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Read nothing, drop immediately after a short hold.
            let mut buf = [0u8; 1];
            let _ = tokio::time::timeout(Duration::from_millis(50), stream.read(&mut buf)).await;
            drop(stream);
        });

        let client = TcpBusClient::new(&addr);
        client.start();
        for _ in 0..50 {
            if client.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(client.is_connected());

        accept.await.unwrap();
        for _ in 0..100 {
            if !client.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!client.is_connected());

        client.stop();
    }
}
