//! Embedded schema.
//!
//! `migrations/sqlite/NNN_name.sql` at the workspace root is compiled in and
//! applied by [`Database::new`](crate::Database::new). sqlx records each
//! applied version in `_sqlx_migrations`; an edited file that was already
//! applied fails its checksum, so schema changes always go in a new file.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

static SCHEMA: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    debug!(embedded = SCHEMA.migrations.len(), "Applying schema");
    SCHEMA.run(pool).await?;
    Ok(())
}

/// `(embedded, applied)`. A fresh file that was never opened reports 0
/// applied.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let applied: Option<i64> =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_optional(pool)
            .await
            .ok()
            .flatten();

    Ok((SCHEMA.migrations.len(), applied.unwrap_or(0) as usize))
}
