//! Turning failures into renderable entries.

use super::entries::TreeEntry;
use crate::sidecar::RpcError;
use std::fmt::{Display, Formatter};

/// Phrases the sidecar uses when the stored credentials are rejected.
const AUTH_MARKERS: &[&str] = &[
    "Authentication error",
    "Not authorized",
    "Authorization failed",
];

/// Rejected provider operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    InvalidPageSize { requested: u32, min: u32, max: u32 },
}

impl Display for CollectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageSize {
                requested,
                min,
                max,
            } => write!(
                f,
                "items per page must be between {} and {}, got {}",
                min, max, requested
            ),
        }
    }
}

impl std::error::Error for CollectionError {}

/// Structured explanation of an authorization failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub explanation: String,
    pub suggestion: String,
}

/// Recognizes an authorization failure by its message.
pub fn parse_auth_failure(message: &str) -> Option<AuthFailure> {
    let marker = AUTH_MARKERS
        .iter()
        .copied()
        .find(|marker| message.contains(marker))?;
    let detail = message
        .split_once(marker)
        .map(|(_, rest)| rest.trim_start_matches([':', ' ', '-']).trim())
        .filter(|rest| !rest.is_empty());

    let explanation = match detail {
        Some(detail) => format!("Authentication failed: {}", detail),
        None => "Authentication failed: the server rejected the stored credentials".to_string(),
    };
    Some(AuthFailure {
        explanation,
        suggestion: "Reconnect to the server to refresh your session".to_string(),
    })
}

/// Entries shown in place of a collection when fetching it failed.
pub fn error_entries(source_label: &str, err: &RpcError) -> Vec<TreeEntry> {
    match err {
        RpcError::VersionMismatch {
            client_version,
            server_version,
        } => vec![TreeEntry::VersionMismatch {
            client_version: client_version.clone(),
            server_version: server_version.clone(),
        }],
        RpcError::Server { message } => match parse_auth_failure(message) {
            Some(auth) => vec![
                TreeEntry::error(auth.explanation, None),
                TreeEntry::placeholder(auth.suggestion),
            ],
            None => vec![TreeEntry::error(
                format!("Failed to load {}", source_label),
                Some(message.clone()),
            )],
        },
        RpcError::NotRunning { .. } => {
            vec![TreeEntry::placeholder("ZenML services are not available")]
        }
        other => vec![TreeEntry::error(
            format!("Failed to load {}", source_label),
            Some(other.to_string()),
        )],
    }
}
