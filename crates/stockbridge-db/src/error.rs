//! # Storage Errors
//!
//! `sqlx` failures are sorted into the cases the engine reacts to:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UNIQUE constraint          → AlreadyRecorded  reported as duplicate   │
//! │  CHECK constraint           → NegativeStock    mirror never below 0    │
//! │  pool timeout / db locked   → Busy             next pass retries       │
//! │  no row where one must be   → NotFound                                 │
//! │  anything else              → Query                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The reconciler turns every one of these into a `storage` item error on the
//! record being processed; none of them abort a pass.

use sqlx::error::ErrorKind;
use thiserror::Error;

/// Failure of a local storage operation.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The row's key is already taken. Ledger entries are append-only, so a
    /// second commit for the same source record ends here.
    #[error("already recorded: {key}")]
    AlreadyRecorded { key: String },

    #[error("stock quantity rejected: {0}")]
    NegativeStock(String),

    /// Another connection or process holds the database.
    #[error("database busy: {0}")]
    Busy(String),

    #[error("cannot open database {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored run report no longer parses.
    #[error("stored report unreadable: {0}")]
    Report(#[from] serde_json::Error),

    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
}

impl DbError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// True when the write collided with an existing key.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::AlreadyRecorded { .. })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, DbError::Busy(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let message = db_err.message().to_string();
            match db_err.kind() {
                ErrorKind::UniqueViolation => {
                    // "UNIQUE constraint failed: ledger_entries.connection_id, ..."
                    let key = message
                        .strip_prefix("UNIQUE constraint failed: ")
                        .unwrap_or(&message)
                        .to_string();
                    return DbError::AlreadyRecorded { key };
                }
                ErrorKind::CheckViolation => return DbError::NegativeStock(message),
                _ if message.contains("database is locked") => return DbError::Busy(message),
                _ => {}
            }
        }

        match err {
            sqlx::Error::PoolTimedOut => DbError::Busy("no free connection".to_string()),
            sqlx::Error::RowNotFound => DbError::not_found("row", "query returned none"),
            other => DbError::Query(other),
        }
    }
}

/// Result type for storage operations.
pub type DbResult<T> = Result<T, DbError>;
