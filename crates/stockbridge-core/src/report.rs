//! # Reconciliation Reports
//!
//! Result types that flow back up from the reconciler to the caller.
//!
//! ## Aggregation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ReconcileResult (one per ChangeRecord)                                 │
//! │       │  processed / success / failed / stock_moved / errors[]          │
//! │       ▼                                                                 │
//! │  DirectionReport (one per direction) ← absorb() each record             │
//! │       │  + fetched, echoes skipped, aborted reason, cancelled           │
//! │       ▼                                                                 │
//! │  SyncReport (one per pass) ──► SyncResponse (JSON for the caller)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Partial success is the normal steady state, so nothing here collapses to
//! a single boolean until [`SyncResponse`], and even that keeps the counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Direction, Platform};

// =============================================================================
// Item Errors
// =============================================================================

/// Category of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    /// SKU not present in the target catalog.
    Unmatched,
    /// Target call exceeded its time budget.
    Timeout,
    /// Target rejected the write (4xx).
    Rejected,
    /// Target unreachable; the direction was aborted.
    Unavailable,
    /// Local mirror or ledger write failed.
    Storage,
}

/// A per-item (or per-record) failure collected into the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub source_platform: Platform,
    pub source_id: String,
    pub sku: Option<String>,
    pub kind: ItemErrorKind,
    pub message: String,
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sku {
            Some(sku) => write!(
                f,
                "{} {} [{}]: {}",
                self.source_platform, self.source_id, sku, self.message
            ),
            None => write!(f, "{} {}: {}", self.source_platform, self.source_id, self.message),
        }
    }
}

// =============================================================================
// Per-Record Result
// =============================================================================

/// What happened to a single `ChangeRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Already in the ledger; nothing touched.
    Duplicate,
    /// At least one item moved stock; ledger written.
    Success,
    /// No item matched or moved stock; ledger untouched.
    Failed,
    /// The target became unavailable mid-record; the direction stops here.
    Aborted,
}

/// Result of reconciling one `ChangeRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub source_id: String,
    pub outcome: RecordOutcome,
    pub processed: u32,
    pub success: u32,
    pub stock_moved: i64,
    pub errors: Vec<ItemError>,
    pub warnings: Vec<String>,
}

impl ReconcileResult {
    /// A record short-circuited by the ledger check.
    pub fn duplicate(source_id: impl Into<String>) -> Self {
        ReconcileResult {
            source_id: source_id.into(),
            outcome: RecordOutcome::Duplicate,
            processed: 1,
            success: 0,
            stock_moved: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Starts a result for a record about to be reconciled.
    pub fn started(source_id: impl Into<String>) -> Self {
        ReconcileResult {
            source_id: source_id.into(),
            outcome: RecordOutcome::Failed,
            processed: 1,
            success: 0,
            stock_moved: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Marks the record successful after its ledger entry was written.
    pub fn mark_success(&mut self, stock_moved: i64) {
        self.outcome = RecordOutcome::Success;
        self.success = 1;
        self.stock_moved = stock_moved;
    }

    /// Marks the record as the point where the direction was aborted.
    pub fn mark_aborted(&mut self) {
        self.outcome = RecordOutcome::Aborted;
        self.success = 0;
        self.stock_moved = 0;
    }

    /// True when the record counts as an error in the aggregate.
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, RecordOutcome::Failed | RecordOutcome::Aborted)
    }
}

// =============================================================================
// Per-Direction Aggregate
// =============================================================================

/// Aggregate counters for one direction of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionReport {
    pub direction: Direction,
    /// Records returned by the fetcher (after echo exclusion).
    pub fetched: u32,
    /// Records dropped as echoes of our own writes.
    pub echoes_skipped: u32,
    pub processed: u32,
    pub success: u32,
    /// Records that counted as an error.
    pub failed: u32,
    pub duplicates: u32,
    pub stock_moved: i64,
    /// Item- and record-level error messages.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Set when the direction stopped early (target or source unavailable).
    pub aborted: Option<String>,
    /// Set when a cancellation signal stopped new work.
    pub cancelled: bool,
}

impl DirectionReport {
    pub fn new(direction: Direction) -> Self {
        DirectionReport {
            direction,
            fetched: 0,
            echoes_skipped: 0,
            processed: 0,
            success: 0,
            failed: 0,
            duplicates: 0,
            stock_moved: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            aborted: None,
            cancelled: false,
        }
    }

    /// Folds a record's result into the aggregate.
    pub fn absorb(&mut self, result: &ReconcileResult) {
        self.processed += result.processed;
        self.success += result.success;
        self.stock_moved += result.stock_moved;
        if result.outcome == RecordOutcome::Duplicate {
            self.duplicates += 1;
        }
        if result.is_error() {
            self.failed += 1;
        }
        self.errors
            .extend(result.errors.iter().map(ToString::to_string));
        self.warnings.extend(result.warnings.iter().cloned());
    }

    /// Stops the direction with a reason.
    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.errors.push(format!("{} aborted: {}", self.direction, reason));
        self.aborted = Some(reason);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// JSON-facing summary for this direction.
    pub fn summary(&self) -> DirectionSummary {
        let (stock_deducted, stock_updated) = match self.direction {
            Direction::StoreToPos => (Some(self.stock_moved), None),
            Direction::PosToStore => (None, Some(self.stock_moved)),
        };
        DirectionSummary {
            processed: self.processed,
            success: self.success,
            errors: self.errors.clone(),
            stock_deducted,
            stock_updated,
            warnings: self.warnings.clone(),
            aborted: self.aborted.clone(),
        }
    }
}

// =============================================================================
// Per-Pass Report
// =============================================================================

/// Terminal status of a pass, as journaled in `sync_runs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    /// Both directions ran with no errors.
    Completed,
    /// Ran to the end with some errors or one direction aborted.
    Partial,
    /// Both directions aborted.
    Failed,
    /// Stopped by a cancellation signal.
    Cancelled,
}

impl RunStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full result of one bidirectional pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: String,
    pub connection_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub store_to_pos: DirectionReport,
    pub pos_to_store: DirectionReport,
}

impl SyncReport {
    /// Report for `direction`.
    pub fn direction(&self, direction: Direction) -> &DirectionReport {
        match direction {
            Direction::StoreToPos => &self.store_to_pos,
            Direction::PosToStore => &self.pos_to_store,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.store_to_pos.cancelled || self.pos_to_store.cancelled
    }

    /// Derives the terminal status journaled for this pass.
    pub fn status(&self) -> RunStatus {
        if self.is_cancelled() {
            RunStatus::Cancelled
        } else if self.store_to_pos.is_aborted() && self.pos_to_store.is_aborted() {
            RunStatus::Failed
        } else if self.store_to_pos.has_errors() || self.pos_to_store.has_errors() {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        }
    }

    /// Caller-facing JSON shape.
    pub fn to_response(&self) -> SyncResponse {
        SyncResponse {
            success: true,
            results: Some(SyncResults {
                store_to_pos: self.store_to_pos.summary(),
                pos_to_store: self.pos_to_store.summary(),
            }),
            error: None,
        }
    }
}

// =============================================================================
// JSON Response
// =============================================================================

/// Counters for one direction in the caller-facing response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionSummary {
    pub processed: u32,
    pub success: u32,
    pub errors: Vec<String>,
    /// Store→POS: units deducted on the POS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_deducted: Option<i64>,
    /// POS→Store: units deducted on the Store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_updated: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResults {
    pub store_to_pos: DirectionSummary,
    pub pos_to_store: DirectionSummary,
}

/// `{success, results: {storeToPos, posToStore}}`, or `{success: false, error}`
/// when the pass never started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<SyncResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResponse {
    /// Response for a pass rejected before any fetching.
    pub fn failure(error: impl Into<String>) -> Self {
        SyncResponse {
            success: false,
            results: None,
            error: Some(error.into()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn unmatched(source_id: &str, sku: &str) -> ItemError {
        ItemError {
            source_platform: Platform::Store,
            source_id: source_id.into(),
            sku: Some(sku.into()),
            kind: ItemErrorKind::Unmatched,
            message: "not found in target catalog".into(),
        }
    }

    fn report(direction: Direction) -> SyncReport {
        SyncReport {
            run_id: "run".into(),
            connection_id: "default".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            store_to_pos: DirectionReport::new(Direction::StoreToPos),
            pos_to_store: DirectionReport::new(direction),
        }
    }

    #[test]
    fn test_absorb_counts() {
        let mut agg = DirectionReport::new(Direction::StoreToPos);

        let mut ok = ReconcileResult::started("1001");
        ok.errors.push(unmatched("1001", "XYZ"));
        ok.mark_success(3);
        agg.absorb(&ok);

        agg.absorb(&ReconcileResult::duplicate("1000"));

        let mut bad = ReconcileResult::started("1002");
        bad.errors.push(unmatched("1002", "NOPE"));
        agg.absorb(&bad);

        assert_eq!(agg.processed, 3);
        assert_eq!(agg.success, 1);
        assert_eq!(agg.duplicates, 1);
        assert_eq!(agg.failed, 1);
        assert_eq!(agg.stock_moved, 3);
        assert_eq!(agg.errors.len(), 2);
        assert!(agg.errors[0].contains("XYZ"));
    }

    #[test]
    fn test_duplicate_is_not_error() {
        let dup = ReconcileResult::duplicate("1001");
        assert!(!dup.is_error());
        assert_eq!(dup.processed, 1);
        assert_eq!(dup.success, 0);
    }

    #[test]
    fn test_status_derivation() {
        let clean = report(Direction::PosToStore);
        assert_eq!(clean.status(), RunStatus::Completed);

        let mut partial = report(Direction::PosToStore);
        partial.pos_to_store.abort("POS unreachable");
        assert_eq!(partial.status(), RunStatus::Partial);

        let mut failed = partial.clone();
        failed.store_to_pos.abort("Store unreachable");
        assert_eq!(failed.status(), RunStatus::Failed);

        let mut cancelled = report(Direction::PosToStore);
        cancelled.store_to_pos.cancelled = true;
        assert_eq!(cancelled.status(), RunStatus::Cancelled);
    }

    #[test]
    fn test_response_shape() {
        let mut r = report(Direction::PosToStore);
        r.store_to_pos.processed = 1;
        r.store_to_pos.success = 1;
        r.store_to_pos.stock_moved = 3;
        r.pos_to_store.stock_moved = 2;

        let json = serde_json::to_value(r.to_response()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["results"]["storeToPos"]["stockDeducted"], 3);
        assert_eq!(json["results"]["storeToPos"]["processed"], 1);
        assert_eq!(json["results"]["posToStore"]["stockUpdated"], 2);
        assert!(json["results"]["posToStore"].get("stockDeducted").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failure_response() {
        let json = serde_json::to_value(SyncResponse::failure("missing POS token")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "missing POS token");
        assert!(json.get("results").is_none());
    }
}
