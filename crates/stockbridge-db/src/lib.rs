//! # stockbridge-db
//!
//! What the engine remembers between passes, in one SQLite file per
//! installation. Every table is keyed by `connection_id`, so several
//! Store/POS pairs can share a file.
//!
//! ```text
//!   ledger_entries   one row per source record reconciled; UNIQUE on
//!                    (connection, platform, source id) makes replays no-ops
//!   stock_levels     local mirror of POS on-hand quantity, never negative
//!   sync_runs        one row per pass with its full JSON report
//!   sync_locks       lease that keeps two processes off one connection
//! ```
//!
//! A ledger commit and its mirror decrements share one transaction
//! ([`LedgerRepository::commit`]), so a crash never leaves stock moved
//! without the record marked processed.
//!
//! ```rust,ignore
//! use stockbridge_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("stockbridge.db")).await?;
//! let seen = db.ledger().exists("default", Platform::Store, "1001").await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::ledger::LedgerRepository;
pub use repository::lock::{LockLease, LockRepository};
pub use repository::stock::{StockDecrement, StockRepository};
pub use repository::sync_run::{SyncRunRecord, SyncRunRepository};
