//! # Pass Lock
//!
//! Serializes passes for the same connection.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. In-process: per-connection async mutex (try_lock, never waits)     │
//! │  2. Cross-process: lease row in sync_locks with expiry                 │
//! │                                                                         │
//! │  Either refused → SyncError::PassInProgress, nothing fetched           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A pass renews its lease before every record ([`PassGuard::renew`]). Once
//! the lease has lapsed and another process holds it, renewal fails and the
//! pass stops writing.
//!
//! A guard that is dropped without [`PassGuard::release`] frees the
//! in-process mutex immediately; its lease row lapses after the TTL.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use stockbridge_db::Database;

use crate::error::{SyncError, SyncResult};

/// Per-connection in-process pass mutexes.
#[derive(Debug, Default)]
pub struct PassLockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PassLockRegistry {
    /// Registry shared by every engine in this process.
    pub fn global() -> Arc<PassLockRegistry> {
        static GLOBAL: OnceLock<Arc<PassLockRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(Arc::default).clone()
    }

    /// Takes the pass lock for `connection_id`, or fails immediately with
    /// [`SyncError::PassInProgress`].
    pub async fn acquire(
        &self,
        db: &Database,
        connection_id: &str,
        ttl_secs: i64,
    ) -> SyncResult<PassGuard> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks.entry(connection_id.to_string()).or_default().clone()
        };

        let local = mutex.try_lock_owned().map_err(|_| {
            debug!(connection_id, "Pass already running in this process");
            in_progress(connection_id)
        })?;

        let holder = format!("{}-{}", std::process::id(), Uuid::new_v4());
        if !db.locks().try_acquire(connection_id, &holder, ttl_secs).await? {
            debug!(connection_id, "Pass lease held by another process");
            return Err(in_progress(connection_id));
        }

        Ok(PassGuard {
            _local: local,
            db: db.clone(),
            connection_id: connection_id.to_string(),
            holder,
            ttl_secs,
        })
    }
}

/// Held for the duration of one pass.
#[derive(Debug)]
pub struct PassGuard {
    _local: OwnedMutexGuard<()>,
    db: Database,
    connection_id: String,
    holder: String,
    ttl_secs: i64,
}

impl PassGuard {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Extends the lease by another TTL from now.
    ///
    /// Fails with [`SyncError::PassInProgress`] when the lease lapsed and
    /// another process took it.
    pub async fn renew(&self) -> SyncResult<()> {
        let kept = self
            .db
            .locks()
            .try_acquire(&self.connection_id, &self.holder, self.ttl_secs)
            .await?;
        if kept {
            Ok(())
        } else {
            warn!(connection_id = %self.connection_id, holder = %self.holder, "Pass lease lost");
            Err(in_progress(&self.connection_id))
        }
    }

    /// Drops the lease row, then the in-process mutex.
    pub async fn release(self) {
        if let Err(e) = self.db.locks().release(&self.connection_id, &self.holder).await {
            warn!(connection_id = %self.connection_id, error = %e, "Failed to release pass lease");
        }
    }
}

fn in_progress(connection_id: &str) -> SyncError {
    SyncError::PassInProgress {
        connection_id: connection_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockbridge_db::DbConfig;

    #[tokio::test]
    async fn test_second_pass_is_refused_until_release() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let registry = PassLockRegistry::default();

        let guard = registry.acquire(&db, "default", 900).await.unwrap();
        let err = registry.acquire(&db, "default", 900).await.unwrap_err();
        assert!(matches!(err, SyncError::PassInProgress { .. }));

        // Other connections are independent
        let other = registry.acquire(&db, "other", 900).await.unwrap();

        guard.release().await;
        other.release().await;
        let again = registry.acquire(&db, "default", 900).await.unwrap();
        again.release().await;
    }

    #[tokio::test]
    async fn test_lease_held_elsewhere_is_refused() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.locks().try_acquire("default", "other-process", 900).await.unwrap());

        let registry = PassLockRegistry::default();
        let err = registry.acquire(&db, "default", 900).await.unwrap_err();
        assert!(matches!(err, SyncError::PassInProgress { .. }));

        // The refused attempt leaves the local mutex free
        db.locks().release("default", "other-process").await.unwrap();
        let guard = registry.acquire(&db, "default", 900).await.unwrap();
        guard.release().await;
    }

    #[tokio::test]
    async fn test_renew_keeps_own_lease_and_fails_after_takeover() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let registry = PassLockRegistry::default();

        let guard = registry.acquire(&db, "default", 900).await.unwrap();
        guard.renew().await.unwrap();
        let lease = db.locks().current("default").await.unwrap().unwrap();
        assert_eq!(lease.holder, guard.holder());

        // Lease lapsed and another process picked it up
        db.locks().release("default", guard.holder()).await.unwrap();
        assert!(db.locks().try_acquire("default", "other-process", 900).await.unwrap());

        let err = guard.renew().await.unwrap_err();
        assert!(matches!(err, SyncError::PassInProgress { .. }));

        // Releasing a lost lease leaves the new holder in place
        guard.release().await;
        let lease = db.locks().current("default").await.unwrap().unwrap();
        assert_eq!(lease.holder, "other-process");
    }
}
