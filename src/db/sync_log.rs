//! Operation log persistence
//!
//! Append-only record of every accepted mutation, ordered by the
//! per-user sync version. Devices catch up by reading everything past
//! their watermark.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::error::{AppError, Result};
use crate::sync::{EntityKind, SyncAction};

/// A single accepted mutation as recorded in the log
#[derive(Debug, Clone)]
pub struct SyncLogEntry {
    pub id: i64,
    pub user_id: i64,
    pub action: SyncAction,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub collection_id: Option<String>,
    pub data: Value,
    pub version: i64,
    pub created_at: String,
}

/// Operation log repository
pub struct SyncLogRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SyncLogRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an accepted mutation to the log
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        user_id: i64,
        action: SyncAction,
        entity_type: EntityKind,
        entity_id: &str,
        collection_id: Option<&str>,
        data: &Value,
        version: i64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO sync_log (user_id, action, entity_type, entity_id, collection_id, data, version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(action.as_str())
        .bind(entity_type.as_str())
        .bind(entity_id)
        .bind(collection_id)
        .bind(serde_json::to_string(data)?)
        .bind(version)
        .bind(&now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Get all log entries past a version watermark, oldest first.
    ///
    /// Filtering on the version column rather than the row id keeps
    /// catch-up correct even when log rows commit out of id order.
    pub async fn entries_since(&self, user_id: i64, after_version: i64) -> Result<Vec<SyncLogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, user_id, action, entity_type, entity_id, collection_id,
                   data, version, created_at
            FROM sync_log
            WHERE user_id = ? AND version > ?
            ORDER BY version ASC
            "#,
        )
        .bind(user_id)
        .bind(after_version)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_entry()).collect()
    }

    /// Count log entries past a version watermark
    pub async fn count_since(&self, user_id: i64, after_version: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sync_log WHERE user_id = ? AND version > ?")
                .bind(user_id)
                .bind(after_version)
                .fetch_one(self.pool)
                .await?;

        Ok(row.0)
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    user_id: i64,
    action: String,
    entity_type: String,
    entity_id: String,
    collection_id: Option<String>,
    data: String,
    version: i64,
    created_at: String,
}

impl LogRow {
    fn into_entry(self) -> Result<SyncLogEntry> {
        let action = SyncAction::parse(&self.action)
            .ok_or_else(|| AppError::Internal(format!("Unknown action in sync log: {}", self.action)))?;
        let entity_type = EntityKind::parse(&self.entity_type).ok_or_else(|| {
            AppError::Internal(format!("Unknown entity type in sync log: {}", self.entity_type))
        })?;
        let data = serde_json::from_str(&self.data)?;

        Ok(SyncLogEntry {
            id: self.id,
            user_id: self.user_id,
            action,
            entity_type,
            entity_id: self.entity_id,
            collection_id: self.collection_id,
            data,
            version: self.version,
            created_at: self.created_at,
        })
    }
}
