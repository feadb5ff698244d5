//! Outbox repository
//!
//! SQLite implementation of the store-and-forward contract. The table is
//! the synchronization point: enqueuers and the drainer never coordinate
//! beyond these statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;

use shared::outbox::{OutboxMessage, OutboxStore, MAX_OUTBOX_RETRIES};
use shared::{AppError, AppResult};

#[derive(Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Pending (not yet dead-lettered) row count, for dashboards.
    pub async fn pending_count(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox WHERE sent_at IS NULL AND retries < ?",
        )
        .bind(MAX_OUTBOX_RETRIES)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(e.to_string()))?;
        Ok(count)
    }

    /// Dead-lettered row count, for dashboards.
    pub async fn dead_letter_count(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox WHERE sent_at IS NULL AND retries >= ?",
        )
        .bind(MAX_OUTBOX_RETRIES)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(e.to_string()))?;
        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    topic: String,
    payload: Vec<u8>,
    msg_type: String,
    retries: i64,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl From<OutboxRow> for OutboxMessage {
    fn from(r: OutboxRow) -> Self {
        OutboxMessage {
            id: r.id,
            topic: r.topic,
            payload: r.payload,
            msg_type: r.msg_type,
            retries: r.retries,
            created_at: r.created_at,
            sent_at: r.sent_at,
        }
    }
}

#[async_trait]
impl OutboxStore for OutboxRepository {
    async fn enqueue(&self, topic: &str, payload: &[u8], msg_type: &str) -> AppResult<i64> {
        let result = sqlx::query(
            "INSERT INTO outbox (topic, payload, msg_type, retries, created_at) VALUES (?, ?, ?, 0, ?)",
        )
        .bind(topic)
        .bind(payload)
        .bind(msg_type)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(e.to_string()))?;
        Ok(result.last_insert_rowid())
    }

    async fn list_pending(&self, limit: i64) -> AppResult<Vec<OutboxMessage>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT id, topic, payload, msg_type, retries, created_at, sent_at \
             FROM outbox WHERE sent_at IS NULL AND retries < ? ORDER BY id LIMIT ?",
        )
        .bind(MAX_OUTBOX_RETRIES)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(e.to_string()))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ack(&self, id: i64) -> AppResult<()> {
        sqlx::query("UPDATE outbox SET sent_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(e.to_string()))?;
        Ok(())
    }

    async fn increment_retries(&self, id: i64) -> AppResult<()> {
        sqlx::query("UPDATE outbox SET retries = retries + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(e.to_string()))?;
        Ok(())
    }

    async fn purge(&self, older_than: Duration) -> AppResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| AppError::validation(format!("purge age: {e}")))?;
        let result = sqlx::query(
            "DELETE FROM outbox WHERE (sent_at IS NOT NULL AND sent_at < ?) \
             OR (retries >= ? AND created_at < ?)",
        )
        .bind(cutoff)
        .bind(MAX_OUTBOX_RETRIES)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_enqueue_is_monotonic_and_listed() {
        let repo = OutboxRepository::new(test_pool().await);

        let id1 = repo.enqueue("orders", b"a", "data").await.unwrap();
        let id2 = repo.enqueue("orders", b"b", "order.request").await.unwrap();
        assert!(id2 > id1);

        let pending = repo.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, id1);
        assert_eq!(pending[0].payload, b"a");
        assert_eq!(pending[1].msg_type, "order.request");
        assert!(pending.iter().all(|m| m.sent_at.is_none()));
    }

    #[tokio::test]
    async fn test_ack_removes_from_pending_idempotently() {
        let repo = OutboxRepository::new(test_pool().await);
        let id = repo.enqueue("orders", b"a", "data").await.unwrap();

        repo.ack(id).await.unwrap();
        assert!(repo.list_pending(10).await.unwrap().is_empty());

        // Double ack: row must not reappear
        repo.ack(id).await.unwrap();
        assert!(repo.list_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_retries_dead_letters() {
        let repo = OutboxRepository::new(test_pool().await);
        let id = repo.enqueue("orders", b"a", "data").await.unwrap();

        for _ in 0..MAX_OUTBOX_RETRIES {
            repo.increment_retries(id).await.unwrap();
        }

        assert!(repo.list_pending(10).await.unwrap().is_empty());
        assert_eq!(repo.dead_letter_count().await.unwrap(), 1);
        assert_eq!(repo.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_spares_pending_rows() {
        let repo = OutboxRepository::new(test_pool().await);
        let pending_id = repo.enqueue("orders", b"p", "data").await.unwrap();
        let acked_id = repo.enqueue("orders", b"q", "data").await.unwrap();
        repo.ack(acked_id).await.unwrap();

        // Cutoff in the future relative to the rows: acked row is purged,
        // pending row survives regardless of age.
        let purged = repo.purge(Duration::from_secs(0)).await.unwrap();
        assert_eq!(purged, 1);

        let pending = repo.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, pending_id);
    }

    #[tokio::test]
    async fn test_purge_removes_old_dead_letters() {
        let repo = OutboxRepository::new(test_pool().await);
        let id = repo.enqueue("orders", b"d", "data").await.unwrap();
        for _ in 0..MAX_OUTBOX_RETRIES {
            repo.increment_retries(id).await.unwrap();
        }

        let purged = repo.purge(Duration::from_secs(0)).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(repo.dead_letter_count().await.unwrap(), 0);
    }
}
