//! # Sync Commands
//!
//! `run`, `watch` and `bootstrap`. Each takes the per-connection pass lock,
//! so two invocations against the same database never overlap.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use stockbridge_core::{DirectionReport, SyncReport, SyncResponse};
use stockbridge_sync::{SyncError, SyncOrchestrator, SyncResult};

/// One pass. Exit code 1 when the pass could not start.
pub async fn run_once(config_path: Option<PathBuf>, json: bool) -> anyhow::Result<i32> {
    let config = super::load_config(config_path)?;
    let orchestrator = super::orchestrator(config).await?;

    let outcome = orchestrator.run_sync().await;
    if json {
        let response = match &outcome {
            Ok(report) => report.to_response(),
            Err(e) => SyncResponse::failure(e.to_string()),
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(if outcome.is_ok() { 0 } else { 1 });
    }

    match outcome {
        Ok(report) => {
            print_report(&report);
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

/// Passes on an interval until Ctrl+C.
///
/// Ctrl+C during a pass cancels it: the record in flight finishes, the
/// rest of the pass is skipped, then the loop exits.
pub async fn watch(config_path: Option<PathBuf>, interval: Option<u64>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    config.check_credentials()?;
    let every = interval
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.interval());
    let orchestrator = super::orchestrator(config).await?;

    info!(interval_secs = every.as_secs(), "Watching for changes");

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let pass = orchestrator.run_sync();
                tokio::pin!(pass);

                let mut interrupted = false;
                let outcome = tokio::select! {
                    outcome = &mut pass => outcome,
                    _ = &mut shutdown => {
                        info!("Interrupted, finishing the record in flight");
                        orchestrator.cancel();
                        interrupted = true;
                        pass.await
                    }
                };
                log_outcome(&orchestrator, outcome).await;
                if interrupted {
                    break;
                }
            }
        }
    }

    info!("Watch stopped");
    Ok(())
}

/// Seeds the stock mirror from the Store catalog.
pub async fn bootstrap(config_path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let orchestrator = super::orchestrator(config).await?;

    let report = orchestrator.bootstrap_mirror(force).await?;
    println!(
        "scanned {}  seeded {}  overwritten {}  unchanged {}  skipped {}",
        report.scanned, report.seeded, report.overwritten, report.unchanged, report.skipped
    );
    Ok(())
}

async fn log_outcome(orchestrator: &SyncOrchestrator, outcome: SyncResult<SyncReport>) {
    match outcome {
        Ok(report) => print_report(&report),
        Err(SyncError::PassInProgress { connection_id }) => {
            warn!(connection_id = %connection_id, "Previous pass still running, skipping tick")
        }
        Err(e) => {
            let status = orchestrator.status().await;
            warn!(
                error = %e,
                retryable = e.is_retryable(),
                last_run = ?status.last_run_at,
                "Pass did not run"
            );
        }
    }
}

fn print_report(report: &SyncReport) {
    println!("run {} ({})", report.run_id, report.status());
    print_direction(&report.store_to_pos);
    print_direction(&report.pos_to_store);
}

fn print_direction(d: &DirectionReport) {
    println!(
        "  {:<13} fetched {:>3}  echoes {:>3}  ok {:>3}  dup {:>3}  failed {:>3}  units {:>4}{}",
        d.direction.to_string(),
        d.fetched,
        d.echoes_skipped,
        d.success,
        d.duplicates,
        d.failed,
        d.stock_moved,
        if d.cancelled { "  (cancelled)" } else { "" }
    );
    for error in &d.errors {
        println!("    error: {error}");
    }
    for warning in &d.warnings {
        println!("    warn:  {warning}");
    }
}
