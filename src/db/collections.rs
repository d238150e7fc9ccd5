//! Collection database operations
//!
//! Current-state rows for tab collections. Writes are guarded by the
//! entity's version stamp so concurrent editors lose cleanly instead of
//! clobbering each other.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::error::Result;

use super::{CasOutcome, DeleteOutcome, InsertOutcome};

/// Collection record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Collection {
    pub id: i64,
    pub user_id: i64,
    pub collection_id: String,
    pub title: String,
    pub order_num: i64,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Writable collection fields carried in an operation payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFields {
    pub title: String,
    pub order_num: i64,
}

impl CollectionFields {
    /// Extract typed fields from a loosely-typed client payload.
    ///
    /// Returns `None` when the payload has no usable `title`. Clients send
    /// the display position as `order`.
    pub fn from_payload(data: &Value) -> Option<Self> {
        let title = data.get("title")?.as_str()?.to_string();
        let order_num = data.get("order").and_then(|v| v.as_i64()).unwrap_or(0);
        Some(Self { title, order_num })
    }
}

/// Collection repository
pub struct CollectionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CollectionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a collection by its client-assigned id
    pub async fn find(&self, user_id: i64, collection_id: &str) -> Result<Option<Collection>> {
        let collection = sqlx::query_as::<_, Collection>(
            r#"
            SELECT id, user_id, collection_id, title, order_num, version,
                   created_at, updated_at
            FROM collections
            WHERE user_id = ? AND collection_id = ?
            "#,
        )
        .bind(user_id)
        .bind(collection_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(collection)
    }

    /// Insert a collection unless one already exists under the same id.
    ///
    /// The unique index on (user_id, collection_id) arbitrates duplicate
    /// creates from racing devices; the loser reports `AlreadyExists`.
    pub async fn insert(
        &self,
        user_id: i64,
        collection_id: &str,
        fields: &CollectionFields,
        version: i64,
    ) -> Result<InsertOutcome> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO collections (user_id, collection_id, title, order_num, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, collection_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(collection_id)
        .bind(&fields.title)
        .bind(fields.order_num)
        .bind(version)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    /// Overwrite a collection's fields if its version is still `expected_version`
    pub async fn update_if_version_matches(
        &self,
        user_id: i64,
        collection_id: &str,
        expected_version: i64,
        fields: &CollectionFields,
        new_version: i64,
    ) -> Result<CasOutcome> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE collections
            SET title = ?, order_num = ?, version = ?, updated_at = ?
            WHERE user_id = ? AND collection_id = ? AND version = ?
            "#,
        )
        .bind(&fields.title)
        .bind(fields.order_num)
        .bind(new_version)
        .bind(&now)
        .bind(user_id)
        .bind(collection_id)
        .bind(expected_version)
        .execute(self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(CasOutcome::Applied)
        } else {
            Ok(CasOutcome::VersionMismatch)
        }
    }

    /// Delete a collection and its tabs if its version is still `expected_version`.
    ///
    /// The collection row and its tabs go in one transaction so no reader
    /// ever observes orphaned tabs.
    pub async fn delete_if_version_matches(
        &self,
        user_id: i64,
        collection_id: &str,
        expected_version: i64,
    ) -> Result<DeleteOutcome> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "DELETE FROM collections WHERE user_id = ? AND collection_id = ? AND version = ?",
        )
        .bind(user_id)
        .bind(collection_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            drop(tx);
            return if self.find(user_id, collection_id).await?.is_some() {
                Ok(DeleteOutcome::VersionMismatch)
            } else {
                Ok(DeleteOutcome::NotFound)
            };
        }

        sqlx::query("DELETE FROM collection_tabs WHERE user_id = ? AND collection_id = ?")
            .bind(user_id)
            .bind(collection_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(DeleteOutcome::Applied)
    }
}
