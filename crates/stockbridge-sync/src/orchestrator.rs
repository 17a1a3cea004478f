//! # Sync Orchestrator
//!
//! Runs one bidirectional pass for a connection and reports on it.
//!
//! ## Pass State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  IDLE ──► FETCHING store_to_pos ──► RECONCILING store_to_pos            │
//! │                                            │                            │
//! │       ┌────────────────────────────────────┘                            │
//! │       ▼                                                                 │
//! │  FETCHING pos_to_store ──► RECONCILING pos_to_store ──► DONE            │
//! │                                                                         │
//! │  A direction that fails (source unreadable, target down) is aborted    │
//! │  and reported; the other direction still runs.                         │
//! │                                                                         │
//! │  Returned as errors, before anything is fetched:                        │
//! │    • missing credentials / location      (SyncError::MissingCredentials)│
//! │    • another pass holds the lock         (SyncError::PassInProgress)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Status Events
//! Phase changes, per-record progress and direction failures go to a
//! [`SyncEventEmitter`]. The CLI uses [`TracingEmitter`]; tests and
//! embedders can plug in their own.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use stockbridge_core::validation::normalize_sku;
use stockbridge_core::{
    Direction, DirectionReport, RecordOutcome, RunStatus, SyncReport,
};
use stockbridge_db::Database;

use crate::client::{
    with_timeout, PosApi, PosHttpClient, StoreApi, StoreProduct, WooStoreClient,
};
use crate::config::BridgeConfig;
use crate::context::ConnectionContext;
use crate::error::{SyncError, SyncResult};
use crate::fetcher::ChangeSetFetcher;
use crate::lock::{PassGuard, PassLockRegistry};
use crate::reconciler::StockReconciler;
use crate::resolver::IdentityResolver;

// =============================================================================
// Sync Status
// =============================================================================

/// Where a pass currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "direction", rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Fetching(Direction),
    Reconciling(Direction),
    Done,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Idle => f.write_str("idle"),
            SyncPhase::Fetching(d) => write!(f, "fetching {d}"),
            SyncPhase::Reconciling(d) => write!(f, "reconciling {d}"),
            SyncPhase::Done => f.write_str("done"),
        }
    }
}

/// Current orchestrator status for external queries.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub connection_id: String,
    pub phase: SyncPhase,

    /// Run id of the pass in progress.
    pub current_run: Option<String>,

    /// Records reconciled so far in the current direction.
    pub records_done: usize,

    /// Records fetched for the current direction.
    pub records_total: usize,

    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,

    /// Last error message (if any).
    pub last_error: Option<String>,
}

impl SyncStatus {
    fn new(connection_id: &str) -> Self {
        SyncStatus {
            connection_id: connection_id.to_string(),
            phase: SyncPhase::Idle,
            current_run: None,
            records_done: 0,
            records_total: 0,
            last_run_at: None,
            last_run_status: None,
            last_error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.current_run.is_some()
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives orchestrator events.
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a status change (phase transition, pass end).
    fn emit_status(&self, status: &SyncStatus);

    /// Emits per-record progress within a direction.
    fn emit_progress(&self, direction: Direction, done: usize, total: usize);

    /// Emits a direction- or pass-level error.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _direction: Direction, _done: usize, _total: usize) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

/// Writes events to the tracing subscriber.
pub struct TracingEmitter;

impl SyncEventEmitter for TracingEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        info!(
            connection_id = %status.connection_id,
            phase = %status.phase,
            "Sync status"
        );
    }

    fn emit_progress(&self, direction: Direction, done: usize, total: usize) {
        debug!(direction = %direction, done, total, "Sync progress");
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        error!(retryable, "{}", message);
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Stops the orchestrator from starting new record reconciliations.
///
/// An in-flight record always finishes. Cancellation is sticky: every later
/// pass on the same orchestrator reports `cancelled` without fetching.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        CancelHandle { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that observes the flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

// =============================================================================
// Bootstrap Report
// =============================================================================

/// Result of a full Store catalog pull into the mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    /// Products and variations examined.
    pub scanned: u32,
    /// Mirror rows created.
    pub seeded: u32,
    /// Existing rows overwritten (`force`).
    pub overwritten: u32,
    /// Rows left as they were.
    pub unchanged: u32,
    /// Entries without a SKU or without managed stock.
    pub skipped: u32,
}

// =============================================================================
// Sync Orchestrator
// =============================================================================

/// Runs passes for one connection.
pub struct SyncOrchestrator {
    config: Arc<BridgeConfig>,
    db: Database,
    store: Option<Arc<dyn StoreApi>>,
    pos: Option<Arc<dyn PosApi>>,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
    pass_locks: Arc<PassLockRegistry>,
    cancel: CancelHandle,
}

impl SyncOrchestrator {
    /// Returns the current status.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Requests cancellation; see [`CancelHandle`].
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancel.cancel();
    }

    /// Runs one bidirectional pass.
    ///
    /// ## Returns
    /// * `Ok(report)` - the pass ran; per-record and per-direction failures
    ///   are inside the report
    /// * `Err(_)` - configuration missing, or another pass holds the lock
    pub async fn run_sync(&self) -> SyncResult<SyncReport> {
        let outcome = self.locked_pass().await;

        if let Err(e) = &outcome {
            let mut s = self.status.write().await;
            s.phase = SyncPhase::Idle;
            s.current_run = None;
            s.last_error = Some(e.to_string());
            self.emitter.emit_error(&e.to_string(), e.is_retryable());
        }
        outcome
    }

    async fn locked_pass(&self) -> SyncResult<SyncReport> {
        let store = self.require_store()?;
        let pos = self.require_pos()?;
        let ctx = ConnectionContext::from_config(&self.config)?;

        let guard = self
            .pass_locks
            .acquire(&self.db, &ctx.connection_id, ctx.lock_ttl_secs)
            .await?;
        debug!(holder = %guard.holder(), "Pass lock acquired");

        let outcome = self.run_pass(&ctx, &guard, store, pos).await;
        guard.release().await;
        outcome
    }

    async fn run_pass(
        &self,
        ctx: &ConnectionContext,
        guard: &PassGuard,
        store: Arc<dyn StoreApi>,
        pos: Arc<dyn PosApi>,
    ) -> SyncResult<SyncReport> {
        let run = self.db.sync_runs().start(&ctx.connection_id).await?;
        info!(run_id = %run.id, connection_id = %ctx.connection_id, "Sync pass started");
        {
            let mut s = self.status.write().await;
            s.current_run = Some(run.id.clone());
            s.last_error = None;
        }
        self.set_phase(SyncPhase::Idle).await;

        let fetcher = ChangeSetFetcher::new(ctx, store.clone(), pos.clone());
        let since = fetcher.window_start(Utc::now());

        let mut store_to_pos = DirectionReport::new(Direction::StoreToPos);
        let mut pos_to_store = DirectionReport::new(Direction::PosToStore);
        for direction in Direction::PASS_ORDER {
            let report = self
                .run_direction(direction, ctx, guard, &fetcher, store.clone(), pos.clone(), since)
                .await;
            match direction {
                Direction::StoreToPos => store_to_pos = report,
                Direction::PosToStore => pos_to_store = report,
            }
        }

        let report = SyncReport {
            run_id: run.id,
            connection_id: ctx.connection_id.clone(),
            started_at: run.started_at,
            finished_at: Utc::now(),
            store_to_pos,
            pos_to_store,
        };
        let status = report.status();

        if let Err(e) = self.db.sync_runs().finish(&report).await {
            warn!(run_id = %report.run_id, error = %e, "Failed to journal sync run");
        }

        {
            let mut s = self.status.write().await;
            s.phase = SyncPhase::Done;
            s.current_run = None;
            s.last_run_at = Some(report.finished_at);
            s.last_run_status = Some(status);
            s.last_error = report
                .store_to_pos
                .aborted
                .clone()
                .or_else(|| report.pos_to_store.aborted.clone());
            self.emitter.emit_status(&s);
        }

        info!(
            run_id = %report.run_id,
            status = %status,
            store_to_pos = report.store_to_pos.success,
            pos_to_store = report.pos_to_store.success,
            "Sync pass finished"
        );
        Ok(report)
    }

    async fn run_direction(
        &self,
        direction: Direction,
        ctx: &ConnectionContext,
        guard: &PassGuard,
        fetcher: &ChangeSetFetcher,
        store: Arc<dyn StoreApi>,
        pos: Arc<dyn PosApi>,
        since: DateTime<Utc>,
    ) -> DirectionReport {
        let mut report = DirectionReport::new(direction);
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }

        self.set_phase(SyncPhase::Fetching(direction)).await;
        let fetched = match fetcher.fetch_changes(direction.source(), since).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let reason = format!("could not read {}: {}", direction.source(), e);
                warn!(direction = %direction, error = %e, "Fetch failed, aborting direction");
                self.emitter.emit_error(&reason, true);
                report.abort(reason);
                return report;
            }
        };
        report.fetched = fetched.records.len() as u32;
        report.echoes_skipped = fetched.echoes_skipped;
        report.warnings.extend(fetched.warnings);

        self.set_phase(SyncPhase::Reconciling(direction)).await;
        let total = fetched.records.len();
        {
            let mut s = self.status.write().await;
            s.records_done = 0;
            s.records_total = total;
        }
        if total == 0 {
            return report;
        }

        let mut resolver =
            match IdentityResolver::for_pass(direction.target(), ctx, store.clone(), pos.clone())
                .await
            {
                Ok(resolver) => resolver,
                Err(e) => {
                    let reason = format!("{} catalog unavailable: {}", direction.target(), e);
                    warn!(direction = %direction, error = %e, "Catalog load failed, aborting direction");
                    self.emitter.emit_error(&reason, true);
                    report.abort(reason);
                    return report;
                }
            };
        let reconciler = StockReconciler::new(ctx, self.db.clone(), store, pos);

        for (done, record) in fetched.records.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(direction = %direction, remaining = total - done, "Cancelled, stopping");
                report.cancelled = true;
                break;
            }

            if let Err(e) = guard.renew().await {
                let reason = format!("stopped before {}: {}", record.source_id, e);
                warn!(
                    direction = %direction,
                    remaining = total - done,
                    error = %e,
                    "Pass lease not renewed, aborting direction"
                );
                self.emitter.emit_error(&reason, e.is_retryable());
                report.abort(reason);
                break;
            }

            let result = reconciler.reconcile(record, &mut resolver).await;
            report.absorb(&result);

            self.status.write().await.records_done = done + 1;
            self.emitter.emit_progress(direction, done + 1, total);

            if result.outcome == RecordOutcome::Aborted {
                let reason = result
                    .errors
                    .last()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "target unavailable".to_string());
                let reason = format!("{} unavailable: {}", direction.target(), reason);
                self.emitter.emit_error(&reason, true);
                report.abort(reason);
                break;
            }
        }

        report
    }

    /// Pulls the full Store catalog into the stock mirror.
    ///
    /// Without `force`, existing mirror rows are left alone (first sync
    /// wins). With `force`, every managed product overwrites its row.
    pub async fn bootstrap_mirror(&self, force: bool) -> SyncResult<BootstrapReport> {
        let store = self.require_store()?;
        let connection_id = self.config.connection_id();
        let limit = self.config.request_timeout();
        let per_page = self.config.store.per_page;

        let guard = self
            .pass_locks
            .acquire(&self.db, connection_id, self.config.sync.lock_ttl_secs)
            .await?;
        info!(connection_id, force, "Bootstrapping stock mirror from Store catalog");

        let outcome = async {
            let mut report = BootstrapReport::default();
            let mut page = 1;
            loop {
                guard.renew().await?;
                let products = with_timeout(
                    stockbridge_core::Platform::Store,
                    limit,
                    store.list_products(page, per_page),
                )
                .await?;
                let short = products.len() < per_page as usize;

                for product in products {
                    if product.is_variable() {
                        let mut variation_page = 1;
                        loop {
                            let variations = with_timeout(
                                stockbridge_core::Platform::Store,
                                limit,
                                store.list_variations(&product.id, variation_page, per_page),
                            )
                            .await?;
                            let last = variations.len() < per_page as usize;
                            for variation in variations {
                                self.mirror_product(connection_id, &variation, force, &mut report)
                                    .await?;
                            }
                            if last {
                                break;
                            }
                            variation_page += 1;
                        }
                    } else {
                        self.mirror_product(connection_id, &product, force, &mut report)
                            .await?;
                    }
                }

                if short {
                    break;
                }
                page += 1;
            }
            Ok::<_, SyncError>(report)
        }
        .await;
        guard.release().await;

        let report = outcome?;
        info!(
            scanned = report.scanned,
            seeded = report.seeded,
            overwritten = report.overwritten,
            unchanged = report.unchanged,
            skipped = report.skipped,
            "Stock mirror bootstrap finished"
        );
        Ok(report)
    }

    async fn mirror_product(
        &self,
        connection_id: &str,
        product: &StoreProduct,
        force: bool,
        report: &mut BootstrapReport,
    ) -> SyncResult<()> {
        report.scanned += 1;

        let (Ok(sku), Some(quantity)) = (normalize_sku(&product.sku), product.stock_quantity)
        else {
            report.skipped += 1;
            return Ok(());
        };
        let quantity = quantity.max(0);
        let stock = self.db.stock();

        match stock.get(connection_id, &sku).await? {
            Some(existing) if force => {
                if existing.quantity != quantity {
                    debug!(sku = %sku, from = existing.quantity, to = quantity, "Overwriting mirror");
                }
                stock.set(connection_id, &sku, quantity).await?;
                report.overwritten += 1;
            }
            Some(_) => report.unchanged += 1,
            None => {
                stock.seed_if_absent(connection_id, &sku, quantity).await?;
                report.seeded += 1;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn set_phase(&self, phase: SyncPhase) {
        let mut s = self.status.write().await;
        s.phase = phase;
        self.emitter.emit_status(&s);
    }

    fn require_store(&self) -> SyncResult<Arc<dyn StoreApi>> {
        match &self.store {
            Some(store) => Ok(store.clone()),
            None => {
                // Reports the first missing field
                self.config.store_client_config()?;
                Err(SyncError::Internal("Store client was not built".into()))
            }
        }
    }

    fn require_pos(&self) -> SyncResult<Arc<dyn PosApi>> {
        match &self.pos {
            Some(pos) => Ok(pos.clone()),
            None => {
                self.config.pos_client_config()?;
                Err(SyncError::Internal("POS client was not built".into()))
            }
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`SyncOrchestrator`].
///
/// Platform clients not supplied explicitly are built from the config when
/// its credentials are complete; otherwise the first pass reports what is
/// missing.
pub struct SyncOrchestratorBuilder {
    config: BridgeConfig,
    db: Option<Database>,
    store: Option<Arc<dyn StoreApi>>,
    pos: Option<Arc<dyn PosApi>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    pass_locks: Option<Arc<PassLockRegistry>>,
}

impl SyncOrchestratorBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: BridgeConfig) -> Self {
        SyncOrchestratorBuilder {
            config,
            db: None,
            store: None,
            pos: None,
            emitter: None,
            pass_locks: None,
        }
    }

    /// Sets the database connection.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StoreApi>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_pos(mut self, pos: Arc<dyn PosApi>) -> Self {
        self.pos = Some(pos);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Uses a private lock registry instead of the process-wide one.
    pub fn with_pass_locks(mut self, registry: Arc<PassLockRegistry>) -> Self {
        self.pass_locks = Some(registry);
        self
    }

    /// Builds the orchestrator.
    pub fn build(self) -> SyncResult<SyncOrchestrator> {
        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;

        let store = match self.store {
            Some(store) => Some(store),
            None => match self.config.store_client_config() {
                Ok(client_config) => {
                    let client = WooStoreClient::new(client_config)
                        .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
                    Some(Arc::new(client) as Arc<dyn StoreApi>)
                }
                Err(_) => None,
            },
        };
        let pos = match self.pos {
            Some(pos) => Some(pos),
            None => match self.config.pos_client_config() {
                Ok(client_config) => {
                    let client = PosHttpClient::new(client_config)
                        .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
                    Some(Arc::new(client) as Arc<dyn PosApi>)
                }
                Err(_) => None,
            },
        };

        let status = SyncStatus::new(self.config.connection_id());

        Ok(SyncOrchestrator {
            config: Arc::new(self.config),
            db,
            store,
            pos,
            status: Arc::new(RwLock::new(status)),
            emitter: self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter)),
            pass_locks: self.pass_locks.unwrap_or_else(PassLockRegistry::global),
            cancel: CancelHandle::new(),
        })
    }
}
