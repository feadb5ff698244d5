//! Hourly production tracker
//!
//! Bridges counter delta events into persistent hourly buckets. Reset
//! deltas are skipped so PLC restore artifacts never count as
//! production.

use chrono::Utc;
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::events::{Anomaly, CounterDeltaEvent, EngineEvent};
use crate::db::hourly_counts;

/// Accumulates counter deltas into hourly buckets in the database.
pub struct HourlyTracker {
    pool: SqlitePool,
    tz: Option<Tz>,
}

impl HourlyTracker {
    /// If `timezone` is a valid IANA location (e.g. "America/Chicago") it
    /// is used for date/hour bucketing; otherwise the server's local
    /// timezone is used.
    pub fn new(pool: SqlitePool, timezone: &str) -> Self {
        let tz = if timezone.is_empty() {
            None
        } else {
            match timezone.parse::<Tz>() {
                Ok(tz) => {
                    tracing::info!(%tz, "hourly tracker: using timezone");
                    Some(tz)
                }
                Err(_) => {
                    tracing::warn!(timezone, "hourly tracker: invalid timezone, using local");
                    None
                }
            }
        };
        Self { pool, tz }
    }

    /// Consume engine events until shutdown.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<EngineEvent>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("hourly tracker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = events.recv() => {
                    match result {
                        Ok(EngineEvent::CounterDelta(delta)) => self.handle_delta(&delta).await,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "hourly tracker lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        tracing::info!("hourly tracker stopped");
    }

    /// Record one counter delta into the current date/hour bucket.
    pub async fn handle_delta(&self, delta: &CounterDeltaEvent) {
        if delta.line_id == 0 || delta.job_style_id == 0 {
            return;
        }
        if delta.anomaly == Anomaly::Reset {
            return; // reset artifacts are not production
        }

        let (count_date, hour) = self.current_bucket();
        if let Err(e) = hourly_counts::upsert_hourly_count(
            &self.pool,
            delta.line_id,
            delta.job_style_id,
            &count_date,
            hour,
            delta.delta,
        )
        .await
        {
            tracing::error!(error = %e, "hourly tracker upsert failed");
        }
    }

    /// Date string and hour in the configured timezone.
    fn current_bucket(&self) -> (String, i64) {
        use chrono::Timelike;
        match self.tz {
            Some(tz) => {
                let now = Utc::now().with_timezone(&tz);
                (now.format("%Y-%m-%d").to_string(), now.hour() as i64)
            }
            None => {
                let now = chrono::Local::now();
                (now.format("%Y-%m-%d").to_string(), now.hour() as i64)
            }
        }
    }
}
