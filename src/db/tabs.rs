//! Tab database operations
//!
//! Tabs live under a parent collection and are keyed by
//! (user_id, collection_id, tab_id). Version-guarded writes mirror the
//! collection store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::error::Result;

use super::{CasOutcome, DeleteOutcome, InsertOutcome};

/// Tab record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tab {
    pub id: i64,
    pub user_id: i64,
    pub collection_id: String,
    pub tab_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub favicon: Option<String>,
    pub sort_order: i64,
    pub version: i64,
    pub created_at: String,
}

/// Writable tab fields carried in an operation payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabFields {
    pub title: Option<String>,
    pub url: Option<String>,
    pub favicon: Option<String>,
    pub sort_order: i64,
}

impl TabFields {
    /// Extract typed fields from a loosely-typed client payload.
    ///
    /// Every field is optional for tabs, so this never rejects a payload.
    pub fn from_payload(data: &Value) -> Self {
        Self {
            title: data.get("title").and_then(|v| v.as_str()).map(str::to_string),
            url: data.get("url").and_then(|v| v.as_str()).map(str::to_string),
            favicon: data.get("favicon").and_then(|v| v.as_str()).map(str::to_string),
            sort_order: data.get("sort_order").and_then(|v| v.as_i64()).unwrap_or(0),
        }
    }
}

/// Tab repository
pub struct TabRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TabRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a tab by its client-assigned id within a collection
    pub async fn find(
        &self,
        user_id: i64,
        collection_id: &str,
        tab_id: &str,
    ) -> Result<Option<Tab>> {
        let tab = sqlx::query_as::<_, Tab>(
            r#"
            SELECT id, user_id, collection_id, tab_id, title, url, favicon,
                   sort_order, version, created_at
            FROM collection_tabs
            WHERE user_id = ? AND collection_id = ? AND tab_id = ?
            "#,
        )
        .bind(user_id)
        .bind(collection_id)
        .bind(tab_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(tab)
    }

    /// Insert a tab unless one already exists under the same id
    pub async fn insert(
        &self,
        user_id: i64,
        collection_id: &str,
        tab_id: &str,
        fields: &TabFields,
        version: i64,
    ) -> Result<InsertOutcome> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO collection_tabs (user_id, collection_id, tab_id, title, url, favicon, sort_order, version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, collection_id, tab_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(collection_id)
        .bind(tab_id)
        .bind(&fields.title)
        .bind(&fields.url)
        .bind(&fields.favicon)
        .bind(fields.sort_order)
        .bind(version)
        .bind(&now)
        .execute(self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    /// Overwrite a tab's fields if its version is still `expected_version`
    pub async fn update_if_version_matches(
        &self,
        user_id: i64,
        collection_id: &str,
        tab_id: &str,
        expected_version: i64,
        fields: &TabFields,
        new_version: i64,
    ) -> Result<CasOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE collection_tabs
            SET title = ?, url = ?, favicon = ?, sort_order = ?, version = ?
            WHERE user_id = ? AND collection_id = ? AND tab_id = ? AND version = ?
            "#,
        )
        .bind(&fields.title)
        .bind(&fields.url)
        .bind(&fields.favicon)
        .bind(fields.sort_order)
        .bind(new_version)
        .bind(user_id)
        .bind(collection_id)
        .bind(tab_id)
        .bind(expected_version)
        .execute(self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(CasOutcome::Applied)
        } else {
            Ok(CasOutcome::VersionMismatch)
        }
    }

    /// Delete a tab if its version is still `expected_version`
    pub async fn delete_if_version_matches(
        &self,
        user_id: i64,
        collection_id: &str,
        tab_id: &str,
        expected_version: i64,
    ) -> Result<DeleteOutcome> {
        let result = sqlx::query(
            r#"
            DELETE FROM collection_tabs
            WHERE user_id = ? AND collection_id = ? AND tab_id = ? AND version = ?
            "#,
        )
        .bind(user_id)
        .bind(collection_id)
        .bind(tab_id)
        .bind(expected_version)
        .execute(self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(DeleteOutcome::Applied);
        }

        if self.find(user_id, collection_id, tab_id).await?.is_some() {
            Ok(DeleteOutcome::VersionMismatch)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }
}
