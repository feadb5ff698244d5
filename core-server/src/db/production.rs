//! Production counter repository
//!
//! Per-category produced totals plus an append-only log of report
//! entries.

use chrono::Utc;
use sqlx::SqlitePool;

use shared::{AppError, AppResult};

/// Add `count` to a category's produced total.
pub async fn increment_produced(pool: &SqlitePool, cat_id: &str, count: i64) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO production_counts (cat_id, produced, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(cat_id) DO UPDATE SET produced = produced + excluded.produced, \
         updated_at = excluded.updated_at",
    )
    .bind(cat_id)
    .bind(count)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))?;
    Ok(())
}

/// Append one production log row.
pub async fn log_production(
    pool: &SqlitePool,
    cat_id: &str,
    station_id: &str,
    count: i64,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO production_log (cat_id, station_id, count, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(cat_id)
    .bind(station_id)
    .bind(count)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))?;
    Ok(())
}

/// Produced total for one category (0 if never reported).
pub async fn get_produced(pool: &SqlitePool, cat_id: &str) -> AppResult<i64> {
    let produced: Option<i64> =
        sqlx::query_scalar("SELECT produced FROM production_counts WHERE cat_id = ?")
            .bind(cat_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| AppError::database(e.to_string()))?;
    Ok(produced.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_increment_accumulates() {
        let pool = test_pool().await;
        increment_produced(&pool, "widget-a", 5).await.unwrap();
        increment_produced(&pool, "widget-a", 7).await.unwrap();
        increment_produced(&pool, "widget-b", 1).await.unwrap();

        assert_eq!(get_produced(&pool, "widget-a").await.unwrap(), 12);
        assert_eq!(get_produced(&pool, "widget-b").await.unwrap(), 1);
        assert_eq!(get_produced(&pool, "widget-c").await.unwrap(), 0);
    }
}
