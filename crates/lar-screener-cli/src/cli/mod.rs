//! Subcommand implementations for the `lar` binary.

pub mod audit_cmd;
pub mod discover_cmd;
pub mod lar_cmd;
pub mod monitor_cmd;
pub mod output;

use anyhow::{Context, Result};
use lar_screener::config::ScreenerConfig;
use std::path::Path;

/// Resolve the active config: `--config`, `$LAR_CONFIG`, `./.lar/config.json`, defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<ScreenerConfig> {
    ScreenerConfig::resolve(explicit).context("failed to load config")
}
