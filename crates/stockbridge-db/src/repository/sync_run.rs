//! # Sync Run Repository
//!
//! One row per reconciliation pass: opened as `running` before the first
//! fetch, closed with the terminal status and the full report as JSON.
//! A row left in `running` means the process died mid-pass.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use stockbridge_core::{RunStatus, SyncReport};

/// A journaled pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct SyncRunRecord {
    pub id: String,
    pub connection_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed: i64,
    pub succeeded: i64,
    pub error_count: i64,
    pub stock_moved: i64,
    /// Serialized `SyncReport`.
    #[serde(skip)]
    pub report: Option<String>,
}

impl SyncRunRecord {
    /// Deserializes the stored report, if the run finished.
    pub fn report(&self) -> DbResult<Option<SyncReport>> {
        self.report
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(DbError::from)
    }
}

const SELECT_RUN: &str = r#"
    SELECT id, connection_id, status, started_at, finished_at,
           processed, succeeded, error_count, stock_moved, report
    FROM sync_runs
"#;

/// Repository for the `sync_runs` table.
#[derive(Debug, Clone)]
pub struct SyncRunRepository {
    pool: SqlitePool,
}

impl SyncRunRepository {
    /// Creates a new SyncRunRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncRunRepository { pool }
    }

    /// Opens a `running` row for a new pass.
    pub async fn start(&self, connection_id: &str) -> DbResult<SyncRunRecord> {
        let run = SyncRunRecord {
            id: Uuid::new_v4().to_string(),
            connection_id: connection_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            processed: 0,
            succeeded: 0,
            error_count: 0,
            stock_moved: 0,
            report: None,
        };

        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, connection_id, status, started_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(run.id.as_str())
        .bind(run.connection_id.as_str())
        .bind(run.status)
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;

        debug!(run_id = %run.id, connection_id, "Sync run started");
        Ok(run)
    }

    /// Closes a run with its final report.
    pub async fn finish(&self, report: &SyncReport) -> DbResult<()> {
        let status = report.status();
        let directions = [&report.store_to_pos, &report.pos_to_store];
        let processed: u32 = directions.iter().map(|d| d.processed).sum();
        let succeeded: u32 = directions.iter().map(|d| d.success).sum();
        let error_count = directions.iter().map(|d| d.errors.len() as i64).sum::<i64>();
        let stock_moved: i64 = directions.iter().map(|d| d.stock_moved).sum();
        let json = serde_json::to_string(report)?;

        let updated = sqlx::query(
            r#"
            UPDATE sync_runs SET
                status = ?2,
                finished_at = ?3,
                processed = ?4,
                succeeded = ?5,
                error_count = ?6,
                stock_moved = ?7,
                report = ?8
            WHERE id = ?1
            "#,
        )
        .bind(report.run_id.as_str())
        .bind(status)
        .bind(report.finished_at)
        .bind(i64::from(processed))
        .bind(i64::from(succeeded))
        .bind(error_count)
        .bind(stock_moved)
        .bind(json)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(DbError::not_found("SyncRun", report.run_id.as_str()));
        }

        debug!(run_id = %report.run_id, status = %status, "Sync run finished");
        Ok(())
    }

    /// Gets a run by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<SyncRunRecord>> {
        let sql = format!("{SELECT_RUN} WHERE id = ?1");
        let run = sqlx::query_as::<_, SyncRunRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    /// Most recent runs for a connection, newest first.
    pub async fn recent(&self, connection_id: &str, limit: u32) -> DbResult<Vec<SyncRunRecord>> {
        let sql = format!(
            "{SELECT_RUN} WHERE connection_id = ?1 ORDER BY started_at DESC, rowid DESC LIMIT ?2"
        );
        let runs = sqlx::query_as::<_, SyncRunRecord>(&sql)
            .bind(connection_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(runs)
    }

    /// Most recent run that reached a terminal status.
    pub async fn last_finished(&self, connection_id: &str) -> DbResult<Option<SyncRunRecord>> {
        let sql = format!(
            "{SELECT_RUN} WHERE connection_id = ?1 AND finished_at IS NOT NULL \
             ORDER BY started_at DESC, rowid DESC LIMIT 1"
        );
        let run = sqlx::query_as::<_, SyncRunRecord>(&sql)
            .bind(connection_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use stockbridge_core::{Direction, DirectionReport};

    fn report_for(run: &SyncRunRecord) -> SyncReport {
        let mut store_to_pos = DirectionReport::new(Direction::StoreToPos);
        store_to_pos.processed = 2;
        store_to_pos.success = 1;
        store_to_pos.stock_moved = 3;
        store_to_pos.errors.push("store 1002 [NOPE]: not found".into());

        SyncReport {
            run_id: run.id.clone(),
            connection_id: run.connection_id.clone(),
            started_at: run.started_at,
            finished_at: Utc::now(),
            store_to_pos,
            pos_to_store: DirectionReport::new(Direction::PosToStore),
        }
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let runs = db.sync_runs();

        let run = runs.start("default").await.unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(runs.last_finished("default").await.unwrap().is_none());

        runs.finish(&report_for(&run)).await.unwrap();

        let stored = runs.get(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Partial);
        assert_eq!(stored.processed, 2);
        assert_eq!(stored.succeeded, 1);
        assert_eq!(stored.error_count, 1);
        assert_eq!(stored.stock_moved, 3);
        assert!(stored.finished_at.is_some());

        let report = stored.report().unwrap().unwrap();
        assert_eq!(report.store_to_pos.stock_moved, 3);

        let last = runs.last_finished("default").await.unwrap().unwrap();
        assert_eq!(last.id, run.id);
    }

    #[tokio::test]
    async fn test_finish_unknown_run() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let run = SyncRunRecord {
            id: "missing".into(),
            connection_id: "default".into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            processed: 0,
            succeeded: 0,
            error_count: 0,
            stock_moved: 0,
            report: None,
        };
        let err = db.sync_runs().finish(&report_for(&run)).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
