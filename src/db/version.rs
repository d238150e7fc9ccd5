//! Per-user monotonic version allocation
//!
//! Every accepted mutation is stamped with a version drawn from a single
//! durable counter row per user. The counter advances through an atomic
//! upsert that returns the committed value in the same statement, so two
//! concurrent requests for one user can never observe the same version.

use sqlx::SqlitePool;

use crate::error::Result;

/// Allocator over the `sync_versions` counter table
pub struct VersionAllocator<'a> {
    pool: &'a SqlitePool,
}

impl<'a> VersionAllocator<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Last committed version for a user (0 if nothing allocated yet)
    pub async fn current(&self, user_id: i64) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT current_version FROM sync_versions WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(self.pool)
                .await?;

        Ok(row.map(|(v,)| v).unwrap_or(0))
    }

    /// Allocate the next version for a user
    pub async fn next(&self, user_id: i64) -> Result<i64> {
        self.advance(user_id, 1).await
    }

    /// Allocate a contiguous block of `n` versions, returned ascending.
    ///
    /// The whole block is claimed in one statement; on failure the caller
    /// must abort the batch so no partial numbering leaks into the log.
    pub async fn allocate_block(&self, user_id: i64, n: usize) -> Result<Vec<i64>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let end = self.advance(user_id, n as i64).await?;
        Ok((end - n as i64 + 1..=end).collect())
    }

    async fn advance(&self, user_id: i64, by: i64) -> Result<i64> {
        let (version,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sync_versions (user_id, current_version)
            VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                current_version = current_version + excluded.current_version
            RETURNING current_version
            "#,
        )
        .bind(user_id)
        .bind(by)
        .fetch_one(self.pool)
        .await?;

        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, initialize_schema};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        initialize_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_versions_strictly_increasing() {
        let pool = setup_test_db().await;
        let allocator = VersionAllocator::new(&pool);

        assert_eq!(allocator.current(1).await.unwrap(), 0);
        assert_eq!(allocator.next(1).await.unwrap(), 1);
        assert_eq!(allocator.next(1).await.unwrap(), 2);
        assert_eq!(allocator.next(1).await.unwrap(), 3);
        assert_eq!(allocator.current(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_block_allocation_contiguous() {
        let pool = setup_test_db().await;
        let allocator = VersionAllocator::new(&pool);

        let block = allocator.allocate_block(1, 3).await.unwrap();
        assert_eq!(block, vec![1, 2, 3]);

        assert_eq!(allocator.next(1).await.unwrap(), 4);

        let empty = allocator.allocate_block(1, 0).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(allocator.current(1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_users_have_independent_counters() {
        let pool = setup_test_db().await;
        let allocator = VersionAllocator::new(&pool);

        assert_eq!(allocator.next(1).await.unwrap(), 1);
        assert_eq!(allocator.next(2).await.unwrap(), 1);
        assert_eq!(allocator.next(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_allocations_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("versions.db").display());
        let pool = create_pool(&url).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let allocator = VersionAllocator::new(&pool);
                let mut got = Vec::new();
                for _ in 0..5 {
                    got.push(allocator.next(7).await.unwrap());
                }
                got
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 40);
        assert_eq!(*all.last().unwrap(), 40);
    }
}
