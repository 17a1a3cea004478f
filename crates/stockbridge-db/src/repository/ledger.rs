//! # Ledger Repository
//!
//! Durable record of every change record that has been reconciled.
//!
//! ## Commit Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Reconciler: all target writes for the record are done                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. UPDATE stock_levels SET quantity = MAX(quantity - n, 0)    │   │
//! │  │     (one per deducted SKU)                                     │   │
//! │  │                                                                 │   │
//! │  │  2. INSERT INTO ledger_entries (...)                           │   │
//! │  │     UNIQUE (connection_id, source_platform, source_id)         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ├── COMMIT: mirror and ledger agree                              │
//! │       └── UNIQUE violation: ROLLBACK, mirror untouched, record is a    │
//! │           duplicate committed by a concurrent pass                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::stock::{apply_decrement, StockDecrement};
use stockbridge_core::{Direction, LedgerEntry, Money, Platform};

#[derive(Debug, FromRow)]
struct LedgerRow {
    id: String,
    connection_id: String,
    source_platform: Platform,
    source_id: String,
    direction: Direction,
    total_amount: i64,
    currency_scale: i64,
    customer_label: Option<String>,
    occurred_at: DateTime<Utc>,
    processed_at: DateTime<Utc>,
    items_deducted: i64,
    stock_moved: i64,
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        LedgerEntry {
            id: row.id,
            connection_id: row.connection_id,
            source_platform: row.source_platform,
            source_id: row.source_id,
            direction: row.direction,
            total_amount: Money::from_minor(row.total_amount),
            currency_scale: u32::try_from(row.currency_scale).unwrap_or_default(),
            customer_label: row.customer_label,
            occurred_at: row.occurred_at,
            processed_at: row.processed_at,
            items_deducted: row.items_deducted,
            stock_moved: row.stock_moved,
        }
    }
}

const SELECT_LEDGER: &str = r#"
    SELECT id, connection_id, source_platform, source_id, direction,
           total_amount, currency_scale, customer_label,
           occurred_at, processed_at, items_deducted, stock_moved
    FROM ledger_entries
"#;

/// Repository for the `ledger_entries` table.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Returns true if the record has already been processed.
    pub async fn exists(
        &self,
        connection_id: &str,
        platform: Platform,
        source_id: &str,
    ) -> DbResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM ledger_entries
            WHERE connection_id = ?1 AND source_platform = ?2 AND source_id = ?3
            "#,
        )
        .bind(connection_id)
        .bind(platform)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    /// Gets the ledger entry for a record.
    pub async fn get(
        &self,
        connection_id: &str,
        platform: Platform,
        source_id: &str,
    ) -> DbResult<Option<LedgerEntry>> {
        let sql = format!(
            "{SELECT_LEDGER} WHERE connection_id = ?1 AND source_platform = ?2 AND source_id = ?3"
        );
        let row = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(connection_id)
            .bind(platform)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(LedgerEntry::from))
    }

    /// Inserts a ledger entry on its own.
    ///
    /// ## Returns
    /// * `Err(DbError::AlreadyRecorded)` - the record is already in the ledger
    pub async fn insert(&self, entry: &LedgerEntry) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_entry(&mut *conn, entry).await
    }

    /// Applies mirror decrements and inserts the ledger entry atomically.
    ///
    /// Either both land or neither does.
    pub async fn commit(&self, entry: &LedgerEntry, decrements: &[StockDecrement]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for decrement in decrements {
            apply_decrement(&mut *tx, &entry.connection_id, decrement, now).await?;
        }
        insert_entry(&mut *tx, entry).await?;

        tx.commit().await?;

        debug!(
            source_platform = %entry.source_platform,
            source_id = %entry.source_id,
            skus = decrements.len(),
            stock_moved = entry.stock_moved,
            "Ledger entry committed"
        );
        Ok(())
    }

    /// Most recent entries for a connection, newest first.
    pub async fn recent(&self, connection_id: &str, limit: u32) -> DbResult<Vec<LedgerEntry>> {
        let sql = format!(
            "{SELECT_LEDGER} WHERE connection_id = ?1 ORDER BY processed_at DESC, rowid DESC LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(connection_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(LedgerEntry::from).collect())
    }

    /// Number of entries for a connection.
    pub async fn count(&self, connection_id: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries WHERE connection_id = ?1")
                .bind(connection_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

async fn insert_entry(conn: &mut sqlx::SqliteConnection, entry: &LedgerEntry) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (
            id, connection_id, source_platform, source_id, direction,
            total_amount, currency_scale, customer_label,
            occurred_at, processed_at, items_deducted, stock_moved
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(entry.id.as_str())
    .bind(entry.connection_id.as_str())
    .bind(entry.source_platform)
    .bind(entry.source_id.as_str())
    .bind(entry.direction)
    .bind(entry.total_amount.minor_units())
    .bind(i64::from(entry.currency_scale))
    .bind(entry.customer_label.as_deref())
    .bind(entry.occurred_at)
    .bind(entry.processed_at)
    .bind(entry.items_deducted)
    .bind(entry.stock_moved)
    .execute(conn)
    .await
    .map_err(|e| match DbError::from(e) {
        DbError::AlreadyRecorded { .. } => DbError::AlreadyRecorded {
            key: format!("{} {}", entry.source_platform, entry.source_id),
        },
        other => other,
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
