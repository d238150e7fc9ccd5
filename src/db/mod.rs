//! Database module for SQLite persistence
//!
//! Holds the current-state entity tables (collections, tabs), the append-only
//! sync log, the per-user version counter, and per-device sync cursors.

mod collections;
mod cursors;
mod schema;
mod sync_log;
mod tabs;
mod version;

pub use collections::*;
pub use cursors::*;
pub use schema::*;
pub use sync_log::*;
pub use tabs::*;
pub use version::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::Result;

/// Outcome of a version-guarded update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    VersionMismatch,
}

/// Outcome of an insert keyed on the natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Outcome of a version-guarded delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Applied,
    VersionMismatch,
    NotFound,
}

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run migrations
    initialize_schema(&pool).await?;

    Ok(pool)
}
