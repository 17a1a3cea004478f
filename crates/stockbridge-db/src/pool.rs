//! # Opening the Local Database
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BridgeConfig::database_path()                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(DbConfig::new(path)).await   pool, pragmas, migrations  │
//! │       │                                                                 │
//! │       ├── db.ledger()     processed-record ledger                      │
//! │       ├── db.stock()      stock mirror                                 │
//! │       ├── db.sync_runs()  pass journal                                 │
//! │       └── db.locks()      pass lease                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! File databases run in WAL mode so `stockbridge status` can read while a
//! pass commits. A writer waits up to `busy_timeout` for another process
//! before the statement fails with [`DbError::Busy`].

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::ledger::LedgerRepository;
use crate::repository::lock::LockRepository;
use crate::repository::stock::StockRepository;
use crate::repository::sync_run::SyncRunRepository;

/// Where the database lives and how many connections a process may hold.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `None` is a private in-memory database.
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl DbConfig {
    /// File database, created on first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: Some(path.into()),
            max_connections: 4,
            busy_timeout: Duration::from_secs(10),
        }
    }

    /// In-memory database for tests.
    ///
    /// The data lives only as long as its one connection, so the pool is
    /// pinned to a single connection that never idles out.
    pub fn in_memory() -> Self {
        DbConfig {
            path: None,
            max_connections: 1,
            busy_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            None => SqliteConnectOptions::new().in_memory(true),
        };
        options.foreign_keys(true).busy_timeout(self.busy_timeout)
    }

    fn describe(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }
}

/// Handle to the local database. Clones share one pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let target = config.describe();
        info!(path = %target, "Opening database");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.busy_timeout);
        if config.path.is_none() {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(config.connect_options())
            .await
            .map_err(|e| DbError::Open {
                path: target.clone(),
                reason: e.to_string(),
            })?;

        migrations::run_migrations(&pool).await?;
        info!(path = %target, max_connections = config.max_connections, "Database ready");

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn ledger(&self) -> LedgerRepository {
        LedgerRepository::new(self.pool.clone())
    }

    pub fn stock(&self) -> StockRepository {
        StockRepository::new(self.pool.clone())
    }

    pub fn sync_runs(&self) -> SyncRunRepository {
        SyncRunRepository::new(self.pool.clone())
    }

    pub fn locks(&self) -> LockRepository {
        LockRepository::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
