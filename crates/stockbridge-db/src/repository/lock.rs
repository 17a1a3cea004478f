//! # Pass Lease Repository
//!
//! A single-row lease per connection that keeps two processes from running
//! a pass against the same platform pair at once.
//!
//! ```text
//! try_acquire(holder, ttl)
//!   no row                  → insert, acquired
//!   row expired             → take over, acquired
//!   row held by same holder → extend, acquired
//!   row held by another     → refused
//! ```
//!
//! Expiry is stored as unix seconds so it compares numerically. A holder
//! that crashes without releasing blocks others for at most `ttl`.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::DbResult;

/// A held (or stale) lease.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LockLease {
    pub connection_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    /// Unix seconds.
    pub expires_at: i64,
}

impl LockLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp()
    }
}

/// Repository for the `sync_locks` table.
#[derive(Debug, Clone)]
pub struct LockRepository {
    pool: SqlitePool,
}

impl LockRepository {
    /// Creates a new LockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LockRepository { pool }
    }

    /// Attempts to take the lease for `connection_id`.
    ///
    /// ## Returns
    /// * `Ok(true)` - lease acquired (or extended) by `holder`
    /// * `Ok(false)` - another holder has an unexpired lease
    pub async fn try_acquire(
        &self,
        connection_id: &str,
        holder: &str,
        ttl_secs: i64,
    ) -> DbResult<bool> {
        let now = Utc::now();
        let expires_at = now.timestamp() + ttl_secs.max(1);

        let affected = sqlx::query(
            r#"
            INSERT INTO sync_locks (connection_id, holder, acquired_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (connection_id) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE sync_locks.expires_at <= ?5 OR sync_locks.holder = excluded.holder
            "#,
        )
        .bind(connection_id)
        .bind(holder)
        .bind(now)
        .bind(expires_at)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let acquired = affected > 0;
        debug!(connection_id, holder, acquired, "Pass lease attempt");
        Ok(acquired)
    }

    /// Releases the lease if `holder` still owns it.
    pub async fn release(&self, connection_id: &str, holder: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM sync_locks WHERE connection_id = ?1 AND holder = ?2")
            .bind(connection_id)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Current lease row, expired or not.
    pub async fn current(&self, connection_id: &str) -> DbResult<Option<LockLease>> {
        let lease = sqlx::query_as::<_, LockLease>(
            r#"
            SELECT connection_id, holder, acquired_at, expires_at
            FROM sync_locks
            WHERE connection_id = ?1
            "#,
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lease)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_second_holder_is_refused() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let locks = db.locks();

        assert!(locks.try_acquire("default", "a", 900).await.unwrap());
        assert!(!locks.try_acquire("default", "b", 900).await.unwrap());
        // Re-entrant for the same holder
        assert!(locks.try_acquire("default", "a", 900).await.unwrap());
        // Other connections are independent
        assert!(locks.try_acquire("other", "b", 900).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_frees_lease() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let locks = db.locks();

        assert!(locks.try_acquire("default", "a", 900).await.unwrap());
        // Releasing as a non-holder is a no-op
        locks.release("default", "b").await.unwrap();
        assert!(locks.current("default").await.unwrap().is_some());

        locks.release("default", "a").await.unwrap();
        assert!(locks.current("default").await.unwrap().is_none());
        assert!(locks.try_acquire("default", "b", 900).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let locks = db.locks();

        sqlx::query(
            "INSERT INTO sync_locks (connection_id, holder, acquired_at, expires_at) \
             VALUES ('default', 'crashed', '2020-01-01T00:00:00Z', 0)",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let stale = locks.current("default").await.unwrap().unwrap();
        assert!(stale.is_expired(chrono::Utc::now()));

        assert!(locks.try_acquire("default", "fresh", 900).await.unwrap());
        let lease = locks.current("default").await.unwrap().unwrap();
        assert_eq!(lease.holder, "fresh");
    }
}
