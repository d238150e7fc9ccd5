//! Device sync cursor persistence
//!
//! Tracks, per (user, device), the highest sync version the device has
//! acknowledged. Cursors only move forward.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::Result;

/// Sync cursor record for one device
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncCursor {
    pub user_id: i64,
    pub device_id: String,
    pub last_sync_version: i64,
    pub last_sync_time: String,
}

/// Device cursor repository
pub struct CursorRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CursorRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the stored watermark for a device, zero if it has never synced
    pub async fn read(&self, user_id: i64, device_id: &str) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT last_sync_version FROM client_sync WHERE user_id = ? AND device_id = ?",
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(v,)| v).unwrap_or(0))
    }

    /// Get the full cursor record for a device
    pub async fn get(&self, user_id: i64, device_id: &str) -> Result<Option<SyncCursor>> {
        let cursor = sqlx::query_as::<_, SyncCursor>(
            r#"
            SELECT user_id, device_id, last_sync_version, last_sync_time
            FROM client_sync
            WHERE user_id = ? AND device_id = ?
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(cursor)
    }

    /// Move a device's watermark forward.
    ///
    /// The MAX clamp keeps a stale or empty exchange from dragging the
    /// cursor backwards; the sync timestamp still refreshes.
    pub async fn advance(&self, user_id: i64, device_id: &str, version: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO client_sync (user_id, device_id, last_sync_version, last_sync_time)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, device_id) DO UPDATE SET
                last_sync_version = MAX(last_sync_version, excluded.last_sync_version),
                last_sync_time = excluded.last_sync_time
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(version)
        .bind(&now)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
