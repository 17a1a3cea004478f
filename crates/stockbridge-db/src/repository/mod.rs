//! # Repository Module
//!
//! One repository per table. Each holds a cloned `SqlitePool` handle and is
//! cheap to create; get them from [`crate::Database`] accessors.
//!
//! ```text
//! db.ledger()     → LedgerRepository   (ledger_entries)
//! db.stock()      → StockRepository    (stock_levels)
//! db.sync_runs()  → SyncRunRepository  (sync_runs)
//! db.locks()      → LockRepository     (sync_locks)
//! ```
//!
//! The one multi-table write, mirror decrements plus ledger insert, lives on
//! [`ledger::LedgerRepository::commit`] so both land in a single transaction.

pub mod ledger;
pub mod lock;
pub mod stock;
pub mod sync_run;
