//! Connection-type classification and connect/disconnect transition tracking.

use crate::event_hub::ConnectionStatus;
use regex::Regex;
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv6Addr};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_INTENT_WINDOW: Duration = Duration::from_secs(10);

pub const CONNECTED_EVENT: &str = "server.connected";
pub const DISCONNECTED_EVENT: &str = "server.disconnected";

/// Where the server lives, as reported to analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Local,
    SelfHosted,
    Cloud,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Local => "local",
            ConnectionType::SelfHosted => "self-hosted",
            ConnectionType::Cloud => "cloud",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    UserInitiated,
    Unexpected,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::UserInitiated => "user_initiated",
            DisconnectReason::Unexpected => "unexpected",
        }
    }
}

fn host_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?:[A-Za-z][A-Za-z0-9+.\-]*://)?(?:[^@/]*@)?(\[[^\]]*\]|[^:/?#\s]+)").ok()
        })
        .as_ref()
}

/// Extracts the lowercase host from a server address, without brackets or port.
pub fn host_of(url: &str) -> Option<String> {
    let caps = host_pattern()?.captures(url.trim())?;
    let host = caps.get(1)?.as_str();
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Classifies a server address. Blank, sqlite and loopback addresses are
/// local; private networks and `.local`/`.internal` hosts are self-hosted;
/// everything else is cloud.
pub fn classify_connection(url: &str) -> ConnectionType {
    let trimmed = url.trim();
    if trimmed.is_empty() || trimmed.to_ascii_lowercase().starts_with("sqlite") {
        return ConnectionType::Local;
    }
    let Some(host) = host_of(trimmed) else {
        return ConnectionType::Local;
    };
    if host == "localhost" || host.ends_with(".localhost") {
        return ConnectionType::Local;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) if ip.is_loopback() || ip.is_unspecified() => ConnectionType::Local,
        Ok(IpAddr::V4(ip)) if ip.is_private() || ip.is_link_local() => {
            ConnectionType::SelfHosted
        }
        Ok(IpAddr::V6(ip)) if ip == Ipv6Addr::LOCALHOST || ip.is_unspecified() => {
            ConnectionType::Local
        }
        Ok(_) => ConnectionType::Cloud,
        Err(_) if host.ends_with(".local") || host.ends_with(".internal") => {
            ConnectionType::SelfHosted
        }
        Err(_) => ConnectionType::Cloud,
    }
}

/// A connection-state change worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTransition {
    Connected {
        connection_type: ConnectionType,
    },
    Disconnected {
        connection_type: ConnectionType,
        reason: DisconnectReason,
    },
}

impl ConnectionTransition {
    pub fn event_name(&self) -> &'static str {
        match self {
            ConnectionTransition::Connected { .. } => CONNECTED_EVENT,
            ConnectionTransition::Disconnected { .. } => DISCONNECTED_EVENT,
        }
    }

    pub fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        match self {
            ConnectionTransition::Connected { connection_type } => {
                props.insert("connectionType".into(), connection_type.as_str().into());
            }
            ConnectionTransition::Disconnected {
                connection_type,
                reason,
            } => {
                props.insert("connectionType".into(), connection_type.as_str().into());
                props.insert("disconnectReason".into(), reason.as_str().into());
            }
        }
        props
    }
}

/// Turns a stream of connection-status updates into transitions.
///
/// Repeated states are ignored, as is an initial disconnected state. The
/// type reported on disconnect is the one captured at connect time, since
/// the address may already be reset by then.
#[derive(Debug)]
pub struct ConnectionTracker {
    last: Option<bool>,
    connected_type: Option<ConnectionType>,
    intent_at: Option<Instant>,
    window: Duration,
}

impl ConnectionTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            last: None,
            connected_type: None,
            intent_at: None,
            window,
        }
    }

    /// Notes that the user asked to disconnect.
    pub fn record_disconnect_intent(&mut self) {
        self.intent_at = Some(Instant::now());
    }

    pub fn observe(&mut self, status: &ConnectionStatus) -> Option<ConnectionTransition> {
        if self.last == Some(status.is_connected) {
            return None;
        }
        let previous = self.last.replace(status.is_connected);

        if status.is_connected {
            let connection_type = classify_connection(&status.url);
            self.connected_type = Some(connection_type);
            self.intent_at = None;
            return Some(ConnectionTransition::Connected { connection_type });
        }

        if previous.is_none() {
            return None;
        }
        let connection_type = self
            .connected_type
            .take()
            .unwrap_or_else(|| classify_connection(&status.url));
        let reason = match self.intent_at.take() {
            Some(at) if at.elapsed() <= self.window => DisconnectReason::UserInitiated,
            _ => DisconnectReason::Unexpected,
        };
        Some(ConnectionTransition::Disconnected {
            connection_type,
            reason,
        })
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_INTENT_WINDOW)
    }
}
