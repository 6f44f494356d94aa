//! Analytics event shape and the environment metadata attached to it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the hostname digest.
const FINGERPRINT_LEN: usize = 16;

/// One queued telemetry occurrence, serialized as an element of the batch body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: String,
    pub event: String,
    pub properties: Map<String, Value>,
    pub debug: bool,
}

impl AnalyticsEvent {
    pub fn track(
        user_id: impl Into<String>,
        event: impl Into<String>,
        properties: Map<String, Value>,
        debug: bool,
    ) -> Self {
        Self {
            kind: "track".to_string(),
            user_id: user_id.into(),
            event: event.into(),
            properties,
            debug,
        }
    }
}

/// Process-wide facts merged into every event's properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentMetadata {
    pub client_version: String,
    pub os: String,
    pub arch: String,
    pub machine_id: String,
    pub session_id: String,
}

impl EnvironmentMetadata {
    /// Captures metadata for the running process. The session id is fresh
    /// for every call, so construct this once per process.
    pub fn detect() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        Self {
            client_version: client_version(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            machine_id: machine_fingerprint(&hostname),
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Adds metadata and a timestamp to `properties`. Keys the caller already
    /// set are left alone.
    pub fn apply(&self, properties: &mut Map<String, Value>) {
        let pairs = [
            ("clientVersion", &self.client_version),
            ("os", &self.os),
            ("arch", &self.arch),
            ("machineId", &self.machine_id),
            ("sessionId", &self.session_id),
        ];
        for (key, value) in pairs {
            properties
                .entry(key)
                .or_insert_with(|| Value::String(value.clone()));
        }
        properties
            .entry("timestamp")
            .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
    }
}

/// Version reported to the collector: the build's git sha when known,
/// otherwise the package version.
pub fn client_version() -> String {
    match env!("ZENML_BRIDGE_GIT_SHA") {
        "unknown" | "" => env!("CARGO_PKG_VERSION").to_string(),
        sha => format!("{}+{}", env!("CARGO_PKG_VERSION"), sha),
    }
}

/// Non-reversible identifier derived from the hostname.
pub fn machine_fingerprint(hostname: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex.chars().take(FINGERPRINT_LEN).collect()
}
