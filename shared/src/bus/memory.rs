//! In-process bus for same-process communication and tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{BusClient, SUBSCRIBE_CAPACITY};
use crate::error::{AppError, AppResult};

/// Topic-keyed in-process bus backed by tokio broadcast channels.
///
/// Also serves as the broker core when hosted behind a TCP server: the
/// firehose [`tap`](MemoryBus::tap) carries every published frame
/// regardless of topic so the server can forward to remote subscribers.
#[derive(Clone)]
pub struct MemoryBus {
    topics: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
    firehose: broadcast::Sender<(String, Vec<u8>)>,
    connected: Arc<AtomicBool>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (firehose, _) = broadcast::channel(SUBSCRIBE_CAPACITY);
        Self {
            topics: Arc::new(DashMap::new()),
            firehose,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flip the advisory connection state (tests and fault injection).
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Receive every published `(topic, payload)` pair.
    pub fn tap(&self) -> broadcast::Receiver<(String, Vec<u8>)> {
        self.firehose.subscribe()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBE_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for MemoryBus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> AppResult<()> {
        if !self.is_connected() {
            return Err(AppError::not_connected());
        }
        // A send with no receivers is not a failure for pub/sub.
        let _ = self.sender(topic).send(payload.to_vec());
        let _ = self.firehose.send((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender(topic).subscribe()
    }
}
