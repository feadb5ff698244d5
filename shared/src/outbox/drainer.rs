//! Periodic pump from the outbox store to the bus

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{OutboxStore, DRAIN_BATCH, MAX_OUTBOX_RETRIES, PURGE_AGE, PURGE_EVERY_TICKS};
use crate::bus::BusClient;

/// Periodically sends pending outbox messages.
///
/// FIFO within a tick, best-effort across ticks. A failed publish
/// increments the row's retries and moves on; the batch never aborts.
/// The current publish always completes before a stop is observed.
pub struct OutboxDrainer {
    store: Arc<dyn OutboxStore>,
    client: Arc<dyn BusClient>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl OutboxDrainer {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        client: Arc<dyn BusClient>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            client,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Begin the drain loop on its own task.
    pub fn start(&self) {
        let store = self.store.clone();
        let client = self.client.clone();
        let interval = self.interval;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs_f64(), "outbox drainer started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick

            let mut cycles: u64 = 0;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        drain(store.as_ref(), client.as_ref()).await;
                        cycles += 1;
                        if cycles % PURGE_EVERY_TICKS == 0 {
                            match store.purge(PURGE_AGE).await {
                                Ok(n) if n > 0 => {
                                    tracing::info!(purged = n, "outbox: purged old messages");
                                }
                                Ok(_) => {}
                                Err(e) => tracing::warn!(error = %e, "outbox: purge failed"),
                            }
                        }
                    }
                }
            }
            tracing::info!("outbox drainer stopped");
        });
    }

    /// Signal the loop to stop. Idempotent; the in-flight publish
    /// completes first.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

/// One drain pass: skip when disconnected, publish pending rows in id
/// order, ack on success, count a retry on failure.
async fn drain(store: &dyn OutboxStore, client: &dyn BusClient) {
    if !client.is_connected() {
        return;
    }

    let msgs = match store.list_pending(DRAIN_BATCH).await {
        Ok(msgs) => msgs,
        Err(e) => {
            tracing::warn!(error = %e, "outbox: list pending failed");
            return;
        }
    };
    if !msgs.is_empty() {
        tracing::debug!(pending = msgs.len(), "outbox: draining");
    }

    for msg in msgs {
        if let Err(e) = client.publish(&msg.topic, &msg.payload).await {
            if let Err(inc_err) = store.increment_retries(msg.id).await {
                tracing::error!(id = msg.id, error = %inc_err, "outbox: retry increment failed");
                continue;
            }
            let attempts = msg.retries + 1;
            if attempts >= MAX_OUTBOX_RETRIES {
                tracing::error!(
                    id = msg.id,
                    msg_type = %msg.msg_type,
                    attempts,
                    error = %e,
                    "outbox: message dead-lettered"
                );
            } else {
                tracing::warn!(
                    id = msg.id,
                    topic = %msg.topic,
                    error = %e,
                    "outbox: publish failed (retry {attempts}/{MAX_OUTBOX_RETRIES})"
                );
            }
            continue;
        }

        if let Err(e) = store.ack(msg.id).await {
            tracing::warn!(id = msg.id, error = %e, "outbox: ack failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::error::{AppError, AppResult};
    use crate::outbox::OutboxMessage;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// In-memory store implementing the outbox contract.
    #[derive(Default)]
    struct MemStore {
        rows: Mutex<Vec<OutboxMessage>>,
        purged: Mutex<u64>,
    }

    #[async_trait]
    impl OutboxStore for MemStore {
        async fn enqueue(&self, topic: &str, payload: &[u8], msg_type: &str) -> AppResult<i64> {
            let mut rows = self.rows.lock().unwrap();
            let id = rows.last().map(|m| m.id + 1).unwrap_or(1);
            rows.push(OutboxMessage {
                id,
                topic: topic.to_string(),
                payload: payload.to_vec(),
                msg_type: msg_type.to_string(),
                retries: 0,
                created_at: Utc::now(),
                sent_at: None,
            });
            Ok(id)
        }

        async fn list_pending(&self, limit: i64) -> AppResult<Vec<OutboxMessage>> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|m| m.sent_at.is_none() && m.retries < MAX_OUTBOX_RETRIES)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn ack(&self, id: i64) -> AppResult<()> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(m) = rows.iter_mut().find(|m| m.id == id) {
                m.sent_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn increment_retries(&self, id: i64) -> AppResult<()> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(m) = rows.iter_mut().find(|m| m.id == id) {
                m.retries += 1;
            }
            Ok(())
        }

        async fn purge(&self, _older_than: Duration) -> AppResult<u64> {
            *self.purged.lock().unwrap() += 1;
            Ok(0)
        }
    }

    /// Bus that fails publishes for payloads in the deny set.
    struct FlakyBus {
        inner: MemoryBus,
        deny: Mutex<HashSet<Vec<u8>>>,
    }

    impl FlakyBus {
        fn new(deny: impl IntoIterator<Item = Vec<u8>>) -> Self {
            Self {
                inner: MemoryBus::new(),
                deny: Mutex::new(deny.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl BusClient for FlakyBus {
        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        async fn publish(&self, topic: &str, payload: &[u8]) -> AppResult<()> {
            if self.deny.lock().unwrap().contains(payload) {
                return Err(AppError::transport("injected failure"));
            }
            self.inner.publish(topic, payload).await
        }

        fn subscribe(&self, topic: &str) -> tokio::sync::broadcast::Receiver<Vec<u8>> {
            self.inner.subscribe(topic)
        }
    }

    #[tokio::test]
    async fn test_at_least_once_with_partial_failure() {
        let store = Arc::new(MemStore::default());
        let bus = Arc::new(FlakyBus::new([b"m2".to_vec()]));

        store.enqueue("orders", b"m1", "data").await.unwrap();
        store.enqueue("orders", b"m2", "data").await.unwrap();
        store.enqueue("orders", b"m3", "data").await.unwrap();

        drain(store.as_ref(), bus.as_ref()).await;

        let rows = store.rows.lock().unwrap().clone();
        assert!(rows[0].sent_at.is_some());
        assert!(rows[1].sent_at.is_none());
        assert_eq!(rows[1].retries, 1);
        assert!(rows[2].sent_at.is_some(), "failure must not abort the batch");

        // 10 failing ticks dead-letter row 2
        for _ in 0..9 {
            drain(store.as_ref(), bus.as_ref()).await;
        }
        let rows = store.rows.lock().unwrap().clone();
        assert_eq!(rows[1].retries, MAX_OUTBOX_RETRIES);

        let pending = store.list_pending(100).await.unwrap();
        assert!(pending.is_empty(), "dead-lettered row must not be listed");
    }

    #[tokio::test]
    async fn test_skips_tick_when_disconnected() {
        let store = Arc::new(MemStore::default());
        let bus = Arc::new(MemoryBus::new());
        bus.set_connected(false);

        store.enqueue("orders", b"m1", "data").await.unwrap();
        drain(store.as_ref(), bus.as_ref()).await;

        let rows = store.rows.lock().unwrap().clone();
        assert!(rows[0].sent_at.is_none());
        assert_eq!(rows[0].retries, 0, "no retry is charged while disconnected");
    }

    #[tokio::test]
    async fn test_publishes_to_row_topic_in_id_order() {
        let store = Arc::new(MemStore::default());
        let bus = Arc::new(MemoryBus::new());
        let mut orders_rx = bus.subscribe("orders");
        let mut dispatch_rx = bus.subscribe("dispatch");

        store.enqueue("orders", b"a", "data").await.unwrap();
        store.enqueue("dispatch", b"b", "order.ack").await.unwrap();
        store.enqueue("orders", b"c", "data").await.unwrap();

        drain(store.as_ref(), bus.as_ref()).await;

        assert_eq!(orders_rx.recv().await.unwrap(), b"a");
        assert_eq!(orders_rx.recv().await.unwrap(), b"c");
        assert_eq!(dispatch_rx.recv().await.unwrap(), b"b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_drains_and_purges_on_schedule() {
        let store = Arc::new(MemStore::default());
        let bus = Arc::new(MemoryBus::new());
        store.enqueue("orders", b"m1", "data").await.unwrap();

        let drainer = OutboxDrainer::new(
            store.clone(),
            bus.clone(),
            Duration::from_millis(10),
        );
        drainer.start();

        // Let ~100 ticks elapse; paused time advances deterministically.
        tokio::time::sleep(Duration::from_millis(1050)).await;
        drainer.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rows = store.rows.lock().unwrap().clone();
        assert!(rows[0].sent_at.is_some());
        assert!(*store.purged.lock().unwrap() >= 1, "purge fires every 100 ticks");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let store = Arc::new(MemStore::default());
        let bus = Arc::new(MemoryBus::new());
        let drainer = OutboxDrainer::new(store, bus, Duration::from_millis(10));
        drainer.start();
        drainer.stop();
        drainer.stop();
    }
}
