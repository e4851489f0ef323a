//! Subcommand implementations

pub mod classify;
pub mod replay;
pub mod signals;

use anyhow::{Context, Result};
use regime_signals::{Config, Symbol};
use std::path::Path;
use tracing::info;

/// Load the configuration file, or fall back to defaults
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let config = Config::from_file(path)?;
            info!("Loaded configuration from: {}", path.display());
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Explicit symbol, else the data file's stem
pub(crate) fn symbol_for(data: &Path, symbol: Option<String>) -> Result<Symbol> {
    if let Some(symbol) = symbol {
        return Ok(Symbol::new(symbol));
    }
    let stem = data
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Cannot derive a symbol from {}", data.display()))?;
    Ok(Symbol::new(stem))
}

pub(crate) fn banner(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{}", title);
    println!("{}", "=".repeat(60));
}

