use crate::analytics::AnalyticsSettings;
use crate::collections::page::{MAX_ITEMS_PER_PAGE, MIN_ITEMS_PER_PAGE};
use crate::collections::DEFAULT_ITEMS_PER_PAGE;
use crate::sidecar::StdioTransportConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Opt-out switch honored by ZenML tooling.
pub const ANALYTICS_OPT_IN_ENV: &str = "ZENML_ANALYTICS_OPT_IN";
/// Cross-tool "do not track" convention.
pub const DO_NOT_TRACK_ENV: &str = "DO_NOT_TRACK";
/// Marks every analytics event as debug traffic.
pub const ANALYTICS_DEBUG_ENV: &str = "ZENML_BRIDGE_ANALYTICS_DEBUG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidPageSize { value: u32 },
    ZeroBatchSize,
    BatchLargerThanQueue { batch_size: usize, capacity: usize },
    ZeroInterval { field: &'static str },
    EmptySidecarCommand,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPageSize { value } => write!(
                f,
                "collections.items_per_page must be between {} and {}, got {}",
                MIN_ITEMS_PER_PAGE, MAX_ITEMS_PER_PAGE, value
            ),
            ConfigError::ZeroBatchSize => write!(f, "analytics.batch_size must be at least 1"),
            ConfigError::BatchLargerThanQueue {
                batch_size,
                capacity,
            } => write!(
                f,
                "analytics.batch_size ({}) must not exceed analytics.queue_capacity ({})",
                batch_size, capacity
            ),
            ConfigError::ZeroInterval { field } => write!(f, "{} must be greater than zero", field),
            ConfigError::EmptySidecarCommand => write!(f, "sidecar.command must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub sidecar: SidecarConfig,
    #[serde(default)]
    pub collections: CollectionsConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

/// How to launch the Python sidecar.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SidecarConfig {
    #[serde(default = "default_sidecar_command")]
    pub command: String,
    #[serde(default = "default_sidecar_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Interpreter the sidecar should use for ZenML. Defaults to `command`.
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            command: default_sidecar_command(),
            args: default_sidecar_args(),
            cwd: None,
            env: BTreeMap::new(),
            interpreter: None,
            handshake_timeout_secs: default_handshake_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_sidecar_command() -> String {
    "python3".to_string()
}

fn default_sidecar_args() -> Vec<String> {
    vec!["bundled/tool/lsp_server.py".to_string()]
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    2
}

impl SidecarConfig {
    /// Transport settings, including the `initializationOptions` the sidecar
    /// reads its interpreter and workspace settings from.
    pub fn transport_config(&self) -> StdioTransportConfig {
        let interpreter = self
            .interpreter
            .clone()
            .unwrap_or_else(|| self.command.clone());
        let mut config = StdioTransportConfig::new(self.command.clone(), self.args.clone());
        config.cwd = self.cwd.clone();
        config.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        config.initialization_options = json!({
            "settings": [{
                "workspace": "file:///",
                "interpreter": [interpreter],
            }],
            "globalSettings": {
                "interpreter": [interpreter],
            },
        });
        config.handshake_timeout = Duration::from_secs(self.handshake_timeout_secs);
        config.shutdown_grace = Duration::from_secs(self.shutdown_grace_secs);
        config
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CollectionsConfig {
    #[serde(default = "default_items_per_page")]
    pub items_per_page: u32,
    /// Poll interval, also used as the response cache TTL.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            items_per_page: default_items_per_page(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

fn default_items_per_page() -> u32 {
    DEFAULT_ITEMS_PER_PAGE
}

fn default_refresh_interval_secs() -> u64 {
    30
}

impl CollectionsConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AnalyticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_disconnect_window_secs")]
    pub disconnect_window_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            endpoint: default_endpoint(),
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
            flush_interval_secs: default_flush_interval_secs(),
            disconnect_window_secs: default_disconnect_window_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    crate::analytics::sender::DEFAULT_ENDPOINT.to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    100
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_disconnect_window_secs() -> u64 {
    10
}

impl AnalyticsConfig {
    pub fn settings(&self) -> AnalyticsSettings {
        AnalyticsSettings {
            enabled: self.enabled,
            debug: self.debug,
            endpoint: self.endpoint.clone(),
            batch_size: self.batch_size,
            capacity: self.queue_capacity,
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            intent_window: Duration::from_secs(self.disconnect_window_secs),
            ..AnalyticsSettings::default()
        }
    }
}

impl BridgeConfig {
    /// Loads `path`, applies environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads the explicit path if given, else `~/.zenml-bridge/config.yaml`
    /// when it exists, else the defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default_path = crate::paths::config_path()?;
        if default_path.exists() {
            return Self::load(&default_path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Telemetry opt-outs from the environment always win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(ANALYTICS_OPT_IN_ENV) {
            if is_falsy(&value) {
                self.analytics.enabled = false;
            }
        }
        if let Ok(value) = std::env::var(DO_NOT_TRACK_ENV) {
            if is_truthy(&value) {
                self.analytics.enabled = false;
            }
        }
        if let Ok(value) = std::env::var(ANALYTICS_DEBUG_ENV) {
            self.analytics.debug = is_truthy(&value);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let per_page = self.collections.items_per_page;
        if !(MIN_ITEMS_PER_PAGE..=MAX_ITEMS_PER_PAGE).contains(&per_page) {
            return Err(ConfigError::InvalidPageSize { value: per_page });
        }
        if self.collections.refresh_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "collections.refresh_interval_secs",
            });
        }
        if self.analytics.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.analytics.batch_size > self.analytics.queue_capacity {
            return Err(ConfigError::BatchLargerThanQueue {
                batch_size: self.analytics.batch_size,
                capacity: self.analytics.queue_capacity,
            });
        }
        if self.analytics.flush_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "analytics.flush_interval_secs",
            });
        }
        if self.sidecar.command.trim().is_empty() {
            return Err(ConfigError::EmptySidecarCommand);
        }
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn is_falsy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
#[path = "tests/config_tests/config_tests.rs"]
mod config_tests;
