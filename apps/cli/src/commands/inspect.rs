//! Read-only views of the local database.

use std::path::PathBuf;

use chrono::Utc;

use stockbridge_db::migrations::migration_status;

/// Last finished run, lease holder and table counts.
pub async fn status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let db = super::open_database(&config).await?;
    let connection_id = config.connection_id();

    println!("connection   {connection_id}");
    println!("database     {}", config.database_path().display());

    let (embedded, applied) = migration_status(db.pool()).await?;
    println!("migrations   {applied}/{embedded} applied");

    match db.sync_runs().last_finished(connection_id).await? {
        Some(run) => {
            let finished = run
                .finished_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "last run     {} {} at {} (processed {}, ok {}, errors {}, units {})",
                run.id,
                run.status,
                finished,
                run.processed,
                run.succeeded,
                run.error_count,
                run.stock_moved
            );
        }
        None => println!("last run     never"),
    }

    match db.locks().current(connection_id).await? {
        Some(lease) if !lease.is_expired(Utc::now()) => {
            println!("pass lock    held by {} since {}", lease.holder, lease.acquired_at)
        }
        _ => println!("pass lock    free"),
    }

    println!("mirror rows  {}", db.stock().count(connection_id).await?);
    println!("ledger rows  {}", db.ledger().count(connection_id).await?);
    Ok(())
}

/// Most recent ledger entries, newest first.
pub async fn ledger(config_path: Option<PathBuf>, limit: u32) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let db = super::open_database(&config).await?;

    let entries = db.ledger().recent(config.connection_id(), limit).await?;
    if entries.is_empty() {
        println!("no records processed yet");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {:<5} {:<12} {:<12} items {:>2}  units {:>4}  total {:>10}  {}",
            entry.processed_at.format("%Y-%m-%d %H:%M:%S"),
            entry.source_platform.to_string(),
            entry.source_id,
            entry.direction.to_string(),
            entry.items_deducted,
            entry.stock_moved,
            entry.total_amount.format(entry.currency_scale),
            entry.customer_label.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
