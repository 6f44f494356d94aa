//! Event payloads and the event-name taxonomy shared across the bridge.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event names used on the hub. Subscriptions are keyed by these strings.
pub mod names {
    pub const LIFECYCLE_CHANGED: &str = "lifecycle-changed";
    pub const SERVICE_INITIALIZED: &str = "service-initialized";
    pub const ACTIVE_PROJECT_CHANGED: &str = "active-project-changed";
    pub const ACTIVE_STACK_CHANGED: &str = "active-stack-changed";
    pub const SERVER_CHANGED: &str = "server-changed";
    pub const CONNECTION_STATUS_UPDATED: &str = "connection-status-updated";
    pub const DISCONNECT_REQUESTED: &str = "disconnect-requested";
    pub const ANALYTICS_TRACK: &str = "analytics-track";
    pub const READINESS_CHANGED: &str = "readiness-changed";
}

/// Lifecycle of the sidecar transport, owned by the RPC client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "Stopped"),
            LifecycleState::Starting => write!(f, "Starting"),
            LifecycleState::Running => write!(f, "Running"),
        }
    }
}

/// Server connection status as observed by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_connected: bool,
    /// Server address at the time of the update. May already be empty or
    /// reset to a default store when a disconnect is observed.
    #[serde(default)]
    pub url: String,
}

impl ConnectionStatus {
    pub fn connected(url: impl Into<String>) -> Self {
        Self {
            is_connected: true,
            url: url.into(),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            url: String::new(),
        }
    }
}

/// Store details reported by the sidecar when its global configuration changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerDetails {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub store_type: String,
}

impl ServerDetails {
    /// A REST store with a non-empty url means a remote server is connected.
    pub fn is_remote_connection(&self) -> bool {
        self.store_type.eq_ignore_ascii_case("rest") && !self.url.trim().is_empty()
    }
}

/// Everything that travels over the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    LifecycleChanged(LifecycleState),
    ServiceInitialized(bool),
    ActiveProjectChanged(String),
    ActiveStackChanged(String),
    ServerChanged(ServerDetails),
    ConnectionStatusUpdated(ConnectionStatus),
    DisconnectRequested,
    AnalyticsTrack {
        event: String,
        properties: Map<String, Value>,
    },
    ReadinessChanged(bool),
    Custom {
        name: String,
        payload: Value,
    },
}

impl HubEvent {
    /// The name subscribers register under.
    pub fn name(&self) -> &str {
        match self {
            HubEvent::LifecycleChanged(_) => names::LIFECYCLE_CHANGED,
            HubEvent::ServiceInitialized(_) => names::SERVICE_INITIALIZED,
            HubEvent::ActiveProjectChanged(_) => names::ACTIVE_PROJECT_CHANGED,
            HubEvent::ActiveStackChanged(_) => names::ACTIVE_STACK_CHANGED,
            HubEvent::ServerChanged(_) => names::SERVER_CHANGED,
            HubEvent::ConnectionStatusUpdated(_) => names::CONNECTION_STATUS_UPDATED,
            HubEvent::DisconnectRequested => names::DISCONNECT_REQUESTED,
            HubEvent::AnalyticsTrack { .. } => names::ANALYTICS_TRACK,
            HubEvent::ReadinessChanged(_) => names::READINESS_CHANGED,
            HubEvent::Custom { name, .. } => name,
        }
    }

    /// Convenience constructor for a track request.
    pub fn track(event: impl Into<String>, properties: Map<String, Value>) -> Self {
        HubEvent::AnalyticsTrack {
            event: event.into(),
            properties,
        }
    }
}
