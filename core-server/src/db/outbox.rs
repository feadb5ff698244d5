//! Outbox repository (core side)
//!
//! Same store-and-forward contract as the edge, with the dispatch topic
//! carried per row: replies and stale notifications target different
//! stations through one queue.

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

impl OutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Dead-lettered row count, for dashboards.
    pub async fn dead_letter_count(&self) -> AppResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE sent_at IS NULL AND retries >= ?")
            .bind(MAX_OUTBOX_RETRIES)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(e.to_string()))
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
        Ok(rows
            .into_iter()
            .map(|r| OutboxMessage {
                id: r.id,
                topic: r.topic,
                payload: r.payload,
                msg_type: r.msg_type,
                retries: r.retries,
                created_at: r.created_at,
                sent_at: r.sent_at,
            })
            .collect())
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
    async fn test_pending_excludes_acked_and_dead_lettered() {
        let repo = OutboxRepository::new(test_pool().await);

        let a = repo.enqueue("dispatch", b"a", "order.ack").await.unwrap();
        let b = repo.enqueue("dispatch", b"b", "data").await.unwrap();
        let c = repo.enqueue("dispatch", b"c", "data").await.unwrap();

        repo.ack(a).await.unwrap();
        for _ in 0..MAX_OUTBOX_RETRIES {
            repo.increment_retries(b).await.unwrap();
        }

        let pending = repo.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, c);
        assert_eq!(repo.dead_letter_count().await.unwrap(), 1);
    }
}
