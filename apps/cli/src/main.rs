//! # stockbridge
//!
//! Command-line entry point for the Store ↔ POS stock bridge.
//!
//! ## Usage
//! ```bash
//! # One pass, JSON result on stdout
//! stockbridge run --json
//!
//! # A pass every five minutes until Ctrl+C
//! stockbridge watch --interval 300
//!
//! # Seed the stock mirror from the Store catalog before the first pass
//! stockbridge bootstrap
//! ```
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=stockbridge=trace` - Trace for stockbridge crates only
//! - Default: `info,stockbridge=debug,sqlx=warn`
//!
//! Logs go to stderr so `--json` output stays parseable.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "stockbridge")]
#[command(author, version, about = "Bidirectional stock sync between a Store and a POS")]
struct Cli {
    /// Path to stockbridge.toml (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one bidirectional sync pass
    Run {
        /// Print the caller-facing JSON result
        #[arg(long)]
        json: bool,
    },
    /// Run passes on an interval until interrupted
    Watch {
        /// Seconds between passes (overrides sync.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Seed the stock mirror from the Store catalog
    Bootstrap {
        /// Overwrite mirror rows that already exist
        #[arg(long)]
        force: bool,
    },
    /// Show the last run and local state
    Status,
    /// List recently processed records
    Ledger {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config with secrets masked
    Show,
    /// Write a default config file
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("Command failed: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Dispatches a command; returns the process exit code.
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config_path = cli.config;

    match cli.command {
        Commands::Run { json } => commands::sync::run_once(config_path, json).await,
        Commands::Watch { interval } => {
            commands::sync::watch(config_path, interval).await?;
            Ok(0)
        }
        Commands::Bootstrap { force } => {
            commands::sync::bootstrap(config_path, force).await?;
            Ok(0)
        }
        Commands::Status => {
            commands::inspect::status(config_path).await?;
            Ok(0)
        }
        Commands::Ledger { limit } => {
            commands::inspect::ledger(config_path, limit).await?;
            Ok(0)
        }
        Commands::Config { action } => {
            match action {
                ConfigAction::Show => commands::config::show(config_path)?,
                ConfigAction::Init { force } => commands::config::init(config_path, force)?,
            }
            Ok(0)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockbridge=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
