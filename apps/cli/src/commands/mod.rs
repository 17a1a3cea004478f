//! # CLI Commands
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sync    - run, watch, bootstrap (take the pass lock)                  │
//! │  inspect - status, ledger (read-only)                                  │
//! │  config  - show, init                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod inspect;
pub mod sync;

use std::path::PathBuf;

use anyhow::Context;
use tracing::debug;

use stockbridge_db::{Database, DbConfig};
use stockbridge_sync::{BridgeConfig, SyncOrchestrator, SyncOrchestratorBuilder, TracingEmitter};

/// Loads config from file and environment.
pub(crate) fn load_config(path: Option<PathBuf>) -> anyhow::Result<BridgeConfig> {
    BridgeConfig::load(path).context("loading configuration")
}

/// Opens (and migrates) the local database named by the config.
pub(crate) async fn open_database(config: &BridgeConfig) -> anyhow::Result<Database> {
    let path = config.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    debug!(?path, "Opening database");

    Database::new(DbConfig::new(path.clone()))
        .await
        .with_context(|| format!("opening database {}", path.display()))
}

/// Orchestrator wired to the HTTP clients and the tracing emitter.
pub(crate) async fn orchestrator(config: BridgeConfig) -> anyhow::Result<SyncOrchestrator> {
    let db = open_database(&config).await?;
    let orchestrator = SyncOrchestratorBuilder::new(config)
        .with_database(db)
        .with_emitter(std::sync::Arc::new(TracingEmitter))
        .build()?;
    Ok(orchestrator)
}
