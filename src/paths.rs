//! Centralized home-based storage paths for bridge persistence.
//!
//! Everything lives under `~/.zenml-bridge/` (or `$ZENML_BRIDGE_HOME`):
//! - `config.yaml` - Optional configuration file
//! - `analytics-id` - Persisted anonymous analytics identifier
//! - `sidecar-debug.log` - Sidecar stderr and protocol chatter

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// The name of the bridge directory under the user's home.
const BRIDGE_DIR: &str = ".zenml-bridge";

/// Environment variable that relocates the bridge home (used by tests and CI).
pub const HOME_OVERRIDE_ENV: &str = "ZENML_BRIDGE_HOME";

/// Returns the bridge home directory: `~/.zenml-bridge/`
///
/// Creates the directory if it doesn't exist.
///
/// # Errors
///
/// Returns an error if:
/// - Home directory cannot be determined
/// - Directory creation fails
pub fn bridge_home_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(HOME_OVERRIDE_ENV) {
        Some(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => user_home()
            .context("Could not determine home directory for bridge storage")?
            .join(BRIDGE_DIR),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create bridge directory: {}", dir.display()))?;
    Ok(dir)
}

#[cfg(not(test))]
fn user_home() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Unit tests get a throwaway home so logs and ids never land in the real one.
#[cfg(test)]
fn user_home() -> Option<PathBuf> {
    static HOME: std::sync::OnceLock<Option<tempfile::TempDir>> = std::sync::OnceLock::new();
    HOME.get_or_init(|| {
        tempfile::Builder::new()
            .prefix("zenml-bridge-home")
            .tempdir()
            .ok()
    })
    .as_ref()
    .map(|dir| dir.path().to_path_buf())
}

/// Returns the default configuration file path: `~/.zenml-bridge/config.yaml`
pub fn config_path() -> Result<PathBuf> {
    Ok(bridge_home_dir()?.join("config.yaml"))
}

/// Returns the persisted analytics id path: `~/.zenml-bridge/analytics-id`
pub fn analytics_id_path() -> Result<PathBuf> {
    Ok(bridge_home_dir()?.join("analytics-id"))
}

/// Returns the sidecar debug log path: `~/.zenml-bridge/sidecar-debug.log`
pub fn sidecar_log_path() -> Result<PathBuf> {
    Ok(bridge_home_dir()?.join("sidecar-debug.log"))
}

#[cfg(test)]
#[path = "tests/paths_tests.rs"]
mod tests;
