//! # stockbridge-sync: Reconciliation Engine for Stockbridge
//!
//! Keeps stock in step between a storefront order system ("Store") and a
//! point-of-sale system ("POS"): sales on either side deduct stock on the
//! other, exactly once.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Engine Architecture                              │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                SyncOrchestrator (one pass = two directions)      │  │
//! │  │                                                                  │  │
//! │  │  Pass lock, phases, run journal, cancellation, status events    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ChangeSetFetcher│  │IdentityResolver│  │   StockReconciler      │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Trailing window│  │ SKU → product/ │  │ Ledger check, clamp,   │    │
//! │  │ Echo exclusion │  │ variant, cached│  │ target write, mirror + │    │
//! │  │ Date fallback  │  │ per pass       │  │ ledger in one tx       │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          │                   │                       │                  │
//! │          ▼                   ▼                       ▼                  │
//! │  ┌──────────────────────────────────┐   ┌────────────────────────────┐ │
//! │  │  StoreApi / PosApi (client)      │   │  stockbridge-db            │ │
//! │  │  WooStoreClient, PosHttpClient   │   │  ledger, mirror, runs,     │ │
//! │  │                                  │   │  pass lease                │ │
//! │  └──────────────────────────────────┘   └────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`orchestrator`] - `SyncOrchestrator`, status, events, mirror bootstrap
//! - [`reconciler`] - Per-record reconciliation
//! - [`fetcher`] - Change-set fetching
//! - [`resolver`] - SKU identity resolution
//! - [`client`] - Platform API traits and HTTP clients
//! - [`lock`] - Per-connection pass lock
//! - [`context`] - `ConnectionContext`
//! - [`config`] - `BridgeConfig` (TOML + environment)
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockbridge_db::{Database, DbConfig};
//! use stockbridge_sync::{BridgeConfig, SyncOrchestratorBuilder};
//!
//! let config = BridgeConfig::load(None)?;
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//!
//! let orchestrator = SyncOrchestratorBuilder::new(config)
//!     .with_database(db)
//!     .build()?;
//!
//! let report = orchestrator.run_sync().await?;
//! println!("{}", serde_json::to_string_pretty(&report.to_response())?);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod fetcher;
pub mod lock;
pub mod orchestrator;
pub mod reconciler;
pub mod resolver;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::{ApiError, ApiResult, PosApi, PosHttpClient, StoreApi, WooStoreClient};
pub use config::BridgeConfig;
pub use context::ConnectionContext;
pub use error::{SyncError, SyncResult};
pub use fetcher::{ChangeSetFetcher, FetchedChanges};
pub use lock::{PassGuard, PassLockRegistry};
pub use orchestrator::{
    BootstrapReport, CancelHandle, NoOpEmitter, SyncEventEmitter, SyncOrchestrator,
    SyncOrchestratorBuilder, SyncPhase, SyncStatus, TracingEmitter,
};
pub use reconciler::StockReconciler;
pub use resolver::IdentityResolver;
