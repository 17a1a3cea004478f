//! `config show` and `config init`.

use std::path::PathBuf;

use anyhow::{bail, Context};

use stockbridge_sync::BridgeConfig;

/// Prints the effective config (file + environment) with secrets masked.
pub fn show(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::load_config(config_path.clone())?;
    let source = config_path.or_else(BridgeConfig::default_config_path);

    if let Some(path) = source {
        println!("# {}", path.display());
    }
    print!("{}", config.to_redacted_toml()?);

    if let Err(e) = config.check_credentials() {
        println!("# incomplete: {e}");
    }
    Ok(())
}

/// Writes a default config file for the user to fill in.
pub fn init(config_path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = config_path
        .or_else(BridgeConfig::default_config_path)
        .context("no config directory on this platform; pass --config")?;

    if path.exists() && !force {
        bail!("{} already exists (use --force to replace it)", path.display());
    }

    BridgeConfig::default().save(Some(path.clone()))?;
    println!("wrote {}", path.display());
    Ok(())
}
