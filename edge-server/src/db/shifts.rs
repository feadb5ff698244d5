//! Shift repository
//!
//! Work shifts give the production views their time-band context.

use sqlx::SqlitePool;

use shared::{AppError, AppResult};

/// A work shift with start/end times (HH:MM).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize, serde::Deserialize)]
pub struct Shift {
    pub id: i64,
    pub name: String,
    pub shift_number: i64,
    pub start_time: String,
    pub end_time: String,
}

/// All shifts ordered by shift_number.
pub async fn list_shifts(pool: &SqlitePool) -> AppResult<Vec<Shift>> {
    sqlx::query_as::<_, Shift>(
        "SELECT id, name, shift_number, start_time, end_time FROM shifts ORDER BY shift_number",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))
}

/// Insert or replace a shift by shift_number.
pub async fn upsert_shift(
    pool: &SqlitePool,
    shift_number: i64,
    name: &str,
    start_time: &str,
    end_time: &str,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO shifts (shift_number, name, start_time, end_time) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT(shift_number) DO UPDATE SET \
         name = excluded.name, start_time = excluded.start_time, end_time = excluded.end_time",
    )
    .bind(shift_number)
    .bind(name)
    .bind(start_time)
    .bind(end_time)
    .execute(pool)
    .await
    .map_err(|e| AppError::database(e.to_string()))?;
    Ok(())
}

/// Remove a shift by shift_number.
pub async fn delete_shift(pool: &SqlitePool, shift_number: i64) -> AppResult<()> {
    sqlx::query("DELETE FROM shifts WHERE shift_number = ?")
        .bind(shift_number)
        .execute(pool)
        .await
        .map_err(|e| AppError::database(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_upsert_replaces_by_shift_number() {
        let pool = test_pool().await;

        upsert_shift(&pool, 1, "Day", "06:00", "14:00").await.unwrap();
        upsert_shift(&pool, 2, "Swing", "14:00", "22:00").await.unwrap();
        upsert_shift(&pool, 1, "Early", "05:00", "13:00").await.unwrap();

        let shifts = list_shifts(&pool).await.unwrap();
        assert_eq!(shifts.len(), 2);
        assert_eq!(shifts[0].name, "Early");
        assert_eq!(shifts[0].start_time, "05:00");

        delete_shift(&pool, 1).await.unwrap();
        assert_eq!(list_shifts(&pool).await.unwrap().len(), 1);
    }
}
