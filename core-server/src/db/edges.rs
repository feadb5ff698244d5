//! Edge registry repository
//!
//! One row per known edge station. Heartbeats touch `last_seen`; the
//! stale sweeper flips `status` once the threshold passes.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;

use shared::{AppError, AppResult};

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_STALE: &str = "stale";

/// A registered edge station.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct EdgeRecord {
    pub station_id: String,
    pub hostname: String,
    pub version: String,
    /// Comma-joined production line ids.
    pub line_ids: String,
    pub status: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Insert or refresh an edge registration. Re-registration resets the
/// status to online.
pub async fn register_edge(
    pool: &SqlitePool,
    station_id: &str,
    hostname: &str,
    version: &str,
    line_ids: &[String],
) -> AppResult<()> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO edges (station_id, hostname, version, line_ids, status, registered_at, last_seen) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(station_id) DO UPDATE SET \
         hostname = excluded.hostname, version = excluded.version, \
         line_ids = excluded.line_ids, status = excluded.status, \
         last_seen = excluded.last_seen",
    )
    .bind(station_id)
    .bind(hostname)
    .bind(version)
    .bind(line_ids.join(","))
    .bind(STATUS_ONLINE)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))?;
    Ok(())
}

/// Touch the last-seen timestamp for a heartbeat. Unknown stations are a
/// handler-level rejection so the caller can skip the ack.
pub async fn update_heartbeat(pool: &SqlitePool, station_id: &str) -> AppResult<()> {
    let result = sqlx::query("UPDATE edges SET last_seen = ?, status = ? WHERE station_id = ?")
        .bind(Utc::now())
        .bind(STATUS_ONLINE)
        .bind(station_id)
        .execute(pool)
        .await
        .map_err(|e| AppError::database(e.to_string()))?;
    if result.rows_affected() == 0 {
        return Err(AppError::handler(format!(
            "heartbeat from unregistered station {station_id}"
        )));
    }
    Ok(())
}

/// Mark online edges whose last heartbeat is older than `threshold` as
/// stale; returns the station ids flipped by this call (already-stale
/// rows are not re-reported).
pub async fn mark_stale_edges(pool: &SqlitePool, threshold: Duration) -> AppResult<Vec<String>> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(threshold)
            .map_err(|e| AppError::validation(format!("stale threshold: {e}")))?;

    let stale: Vec<(String,)> =
        sqlx::query_as("SELECT station_id FROM edges WHERE status = ? AND last_seen < ?")
            .bind(STATUS_ONLINE)
            .bind(cutoff)
            .fetch_all(pool)
            .await
            .map_err(|e| AppError::database(e.to_string()))?;

    for (station_id,) in &stale {
        sqlx::query("UPDATE edges SET status = ? WHERE station_id = ?")
            .bind(STATUS_STALE)
            .bind(station_id)
            .execute(pool)
            .await
            .map_err(|e| AppError::database(e.to_string()))?;
    }

    Ok(stale.into_iter().map(|(id,)| id).collect())
}

/// All registered edges, most recently seen first.
pub async fn list_edges(pool: &SqlitePool) -> AppResult<Vec<EdgeRecord>> {
    sqlx::query_as::<_, EdgeRecord>(
        "SELECT station_id, hostname, version, line_ids, status, registered_at, last_seen \
         FROM edges ORDER BY last_seen DESC",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))
}
