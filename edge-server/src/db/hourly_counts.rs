//! Hourly production bucket repository
//!
//! Append-only accumulation keyed by (line, job style, date, hour); the
//! upsert is additive so buckets survive process restarts.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;

use shared::{AppError, AppResult};

/// Accumulated production count for one hour.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
pub struct HourlyCount {
    pub id: i64,
    pub line_id: i64,
    pub job_style_id: i64,
    pub count_date: String,
    pub hour: i64,
    pub delta: i64,
}

/// Add `delta` to the bucket for the given line/style/date/hour, creating
/// the row if absent.
pub async fn upsert_hourly_count(
    pool: &SqlitePool,
    line_id: i64,
    job_style_id: i64,
    count_date: &str,
    hour: i64,
    delta: i64,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO hourly_counts (line_id, job_style_id, count_date, hour, delta, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(line_id, job_style_id, count_date, hour) \
         DO UPDATE SET delta = delta + excluded.delta, updated_at = excluded.updated_at",
    )
    .bind(line_id)
    .bind(job_style_id)
    .bind(count_date)
    .bind(hour)
    .bind(delta)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))?;
    Ok(())
}

/// All bucket rows for a line/style/date, ordered by hour.
pub async fn list_hourly_counts(
    pool: &SqlitePool,
    line_id: i64,
    job_style_id: i64,
    count_date: &str,
) -> AppResult<Vec<HourlyCount>> {
    sqlx::query_as::<_, HourlyCount>(
        "SELECT id, line_id, job_style_id, count_date, hour, delta \
         FROM hourly_counts \
         WHERE line_id = ? AND job_style_id = ? AND count_date = ? \
         ORDER BY hour",
    )
    .bind(line_id)
    .bind(job_style_id)
    .bind(count_date)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))
}

/// Per-hour totals for a line/date, summed across job styles.
pub async fn hourly_count_totals(
    pool: &SqlitePool,
    line_id: i64,
    count_date: &str,
) -> AppResult<HashMap<i64, i64>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT hour, SUM(delta) FROM hourly_counts \
         WHERE line_id = ? AND count_date = ? \
         GROUP BY hour ORDER BY hour",
    )
    .bind(line_id)
    .bind(count_date)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))?;
    Ok(rows.into_iter().collect())
}
