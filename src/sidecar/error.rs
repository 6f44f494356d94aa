//! Error types for the sidecar transport and RPC client.

use crate::event_hub::LifecycleState;
use std::fmt::{Display, Formatter};

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Failures below the request/response contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The sidecar process could not be spawned.
    Spawn { message: String },
    /// Reading or writing the stdio streams failed.
    Io { message: String },
    /// The stream closed while a request was pending.
    Closed,
    /// The peer sent something that is not valid JSON-RPC.
    Protocol { message: String },
    /// The peer answered with a JSON-RPC error object.
    Remote { code: i64, message: String },
    /// The initialize handshake did not complete in time.
    HandshakeTimeout,
    /// A request was issued before `start` or after `stop`.
    NotStarted,
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn { message } => write!(f, "failed to spawn sidecar: {}", message),
            Self::Io { message } => write!(f, "sidecar I/O error: {}", message),
            Self::Closed => write!(f, "sidecar connection closed"),
            Self::Protocol { message } => write!(f, "sidecar protocol error: {}", message),
            Self::Remote { code, message } => write!(f, "sidecar error {}: {}", code, message),
            Self::HandshakeTimeout => write!(f, "sidecar did not finish initializing in time"),
            Self::NotStarted => write!(f, "sidecar transport is not started"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Error half of every `RpcClient::send_request` result.
///
/// Every failure a caller can see is one of these values; nothing in the
/// request path panics or throws past the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The transport is not `Running`.
    NotRunning { state: LifecycleState },
    /// The sidecar does not recognize the method.
    UnknownMethod { method: String },
    /// The sidecar answered with an `{error}` shape.
    Server { message: String },
    /// The sidecar answered with `{clientVersion, serverVersion}`.
    VersionMismatch {
        client_version: String,
        server_version: String,
    },
    /// The sidecar answered with a shape the caller could not decode.
    MalformedResponse { method: String, message: String },
    /// The request never produced a response.
    Transport { message: String },
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRunning { state } => write!(f, "sidecar is not running (state: {})", state),
            Self::UnknownMethod { method } => write!(f, "unknown sidecar method: {}", method),
            Self::Server { message } => write!(f, "{}", message),
            Self::VersionMismatch {
                client_version,
                server_version,
            } => write!(
                f,
                "client version {} does not match server version {}",
                client_version, server_version
            ),
            Self::MalformedResponse { method, message } => {
                write!(f, "unexpected response to {}: {}", method, message)
            }
            Self::Transport { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Maps a transport failure for `method` into the caller-facing error.
    pub fn from_transport(method: &str, err: TransportError) -> Self {
        match err {
            TransportError::Remote { code, .. } if code == METHOD_NOT_FOUND => {
                Self::UnknownMethod {
                    method: method.to_string(),
                }
            }
            TransportError::Remote { message, .. } => Self::Server { message },
            other => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}
