//! # Stock Mirror Repository
//!
//! Locally mirrored quantity-on-hand per (connection, SKU).
//!
//! ## Lifecycle of a Mirror Row
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  absent ──seed_if_absent(reported)──► quantity = reported (first wins) │
//! │  absent ──set(bootstrap)────────────► quantity = catalog stock         │
//! │                                                                         │
//! │  present ──decrement (in ledger tx)──► quantity = max(q - applied, 0)  │
//! │  present ──set(force bootstrap)──────► quantity = catalog stock         │
//! │  present ──seed_if_absent────────────► unchanged                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Quantities never go below zero; the schema enforces it with a CHECK and
//! every write path clamps before it gets there.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use stockbridge_core::validation::validate_stock_quantity;
use stockbridge_core::StockLevel;

/// A deduction to apply to one mirror row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockDecrement {
    pub sku: String,
    /// Units removed; already clamped to the mirror quantity.
    pub applied: i64,
}

#[derive(Debug, FromRow)]
struct StockRow {
    connection_id: String,
    sku: String,
    quantity: i64,
    last_synced_at: DateTime<Utc>,
}

impl From<StockRow> for StockLevel {
    fn from(row: StockRow) -> Self {
        StockLevel {
            connection_id: row.connection_id,
            sku: row.sku,
            quantity: row.quantity,
            last_synced_at: row.last_synced_at,
        }
    }
}

/// Repository for the `stock_levels` table.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Gets the mirror row for a SKU.
    pub async fn get(&self, connection_id: &str, sku: &str) -> DbResult<Option<StockLevel>> {
        let row = sqlx::query_as::<_, StockRow>(
            r#"
            SELECT connection_id, sku, quantity, last_synced_at
            FROM stock_levels
            WHERE connection_id = ?1 AND sku = ?2
            "#,
        )
        .bind(connection_id)
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StockLevel::from))
    }

    /// Returns the mirror row, creating it from `reported` if none exists.
    ///
    /// The first value written wins: an existing row is returned untouched
    /// even when `reported` differs.
    pub async fn seed_if_absent(
        &self,
        connection_id: &str,
        sku: &str,
        reported: i64,
    ) -> DbResult<StockLevel> {
        let quantity = reported.max(0);

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO stock_levels (connection_id, sku, quantity, last_synced_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(connection_id)
        .bind(sku)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            debug!(connection_id, sku, quantity, "Seeded stock mirror");
        }

        self.get(connection_id, sku)
            .await?
            .ok_or_else(|| DbError::not_found("StockLevel", sku))
    }

    /// Sets the mirror quantity outright (catalog bootstrap).
    pub async fn set(&self, connection_id: &str, sku: &str, quantity: i64) -> DbResult<()> {
        validate_stock_quantity(quantity)
            .map_err(|e| DbError::NegativeStock(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO stock_levels (connection_id, sku, quantity, last_synced_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (connection_id, sku) DO UPDATE SET
                quantity = excluded.quantity,
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(connection_id)
        .bind(sku)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lists all mirror rows for a connection, ordered by SKU.
    pub async fn list(&self, connection_id: &str) -> DbResult<Vec<StockLevel>> {
        let rows = sqlx::query_as::<_, StockRow>(
            r#"
            SELECT connection_id, sku, quantity, last_synced_at
            FROM stock_levels
            WHERE connection_id = ?1
            ORDER BY sku ASC
            "#,
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StockLevel::from).collect())
    }

    /// Number of mirrored SKUs for a connection.
    pub async fn count(&self, connection_id: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM stock_levels WHERE connection_id = ?1")
                .bind(connection_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// Applies one decrement inside an open transaction.
///
/// Clamped at zero in SQL so a stale `applied` can never violate the CHECK.
pub(crate) async fn apply_decrement(
    conn: &mut SqliteConnection,
    connection_id: &str,
    decrement: &StockDecrement,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE stock_levels SET
            quantity = MAX(quantity - ?3, 0),
            last_synced_at = ?4
        WHERE connection_id = ?1 AND sku = ?2
        "#,
    )
    .bind(connection_id)
    .bind(decrement.sku.as_str())
    .bind(decrement.applied.max(0))
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_seed_first_value_wins() {
        let db = db().await;
        let stock = db.stock();

        let first = stock.seed_if_absent("default", "TEE-M", 10).await.unwrap();
        assert_eq!(first.quantity, 10);

        let second = stock.seed_if_absent("default", "TEE-M", 3).await.unwrap();
        assert_eq!(second.quantity, 10);
    }

    #[tokio::test]
    async fn test_seed_clamps_negative_report() {
        let db = db().await;
        let level = db.stock().seed_if_absent("default", "MUG", -4).await.unwrap();
        assert_eq!(level.quantity, 0);
    }

    #[tokio::test]
    async fn test_set_overwrites_and_rejects_negative() {
        let db = db().await;
        let stock = db.stock();

        stock.set("default", "MUG", 5).await.unwrap();
        stock.set("default", "MUG", 8).await.unwrap();
        assert_eq!(stock.get("default", "MUG").await.unwrap().unwrap().quantity, 8);

        assert!(stock.set("default", "MUG", -1).await.is_err());
    }

    #[tokio::test]
    async fn test_rows_are_scoped_by_connection() {
        let db = db().await;
        let stock = db.stock();

        stock.set("shop-a", "MUG", 5).await.unwrap();
        stock.set("shop-b", "MUG", 9).await.unwrap();

        assert_eq!(stock.get("shop-a", "MUG").await.unwrap().unwrap().quantity, 5);
        assert_eq!(stock.count("shop-b").await.unwrap(), 1);
        assert!(stock.get("shop-c", "MUG").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_orders_by_sku() {
        let db = db().await;
        let stock = db.stock();
        stock.set("default", "ZED", 1).await.unwrap();
        stock.set("default", "ABC", 2).await.unwrap();

        let skus: Vec<String> = stock
            .list("default")
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.sku)
            .collect();
        assert_eq!(skus, vec!["ABC", "ZED"]);
    }
}
