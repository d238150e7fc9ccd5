//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Collections (current state, one row per user + natural key)
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    collection_id TEXT NOT NULL,
    title TEXT NOT NULL,
    order_num INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    UNIQUE(user_id, collection_id)
);

CREATE INDEX IF NOT EXISTS idx_collections_user ON collections(user_id);

-- Tabs nested under collections (current state)
CREATE TABLE IF NOT EXISTS collection_tabs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    collection_id TEXT NOT NULL,
    tab_id TEXT NOT NULL,
    title TEXT,
    url TEXT,
    favicon TEXT,
    sort_order INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),

    UNIQUE(user_id, collection_id, tab_id)
);

CREATE INDEX IF NOT EXISTS idx_tabs_user_collection ON collection_tabs(user_id, collection_id);

-- Append-only log of accepted mutations, ordered by per-user version
CREATE TABLE IF NOT EXISTS sync_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    collection_id TEXT,
    data TEXT NOT NULL DEFAULT '{}',
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),

    UNIQUE(user_id, version)
);

CREATE INDEX IF NOT EXISTS idx_sync_log_user_version ON sync_log(user_id, version);

-- Per-user monotonic version counter
CREATE TABLE IF NOT EXISTS sync_versions (
    user_id INTEGER PRIMARY KEY,
    current_version INTEGER NOT NULL DEFAULT 0
);

-- Per-device sync cursors
CREATE TABLE IF NOT EXISTS client_sync (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    device_id TEXT NOT NULL,
    last_sync_version INTEGER NOT NULL DEFAULT 0,
    last_sync_time TEXT NOT NULL DEFAULT (datetime('now')),

    UNIQUE(user_id, device_id)
);

CREATE INDEX IF NOT EXISTS idx_client_sync_user ON client_sync(user_id);
"#;
