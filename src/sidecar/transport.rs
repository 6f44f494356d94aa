//! Seam between the RPC client and whatever carries its messages.

use super::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// Out-of-band signals a transport reports after `start`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The sidecar sent a notification.
    Notification { method: String, params: Value },
    /// The sidecar went away. Every pending request has already been
    /// rejected with [`TransportError::Closed`].
    Exited { reason: String },
}

/// A request/response channel to the sidecar process.
///
/// `start` returns once the peer has completed its handshake. Requests
/// issued afterwards resolve exactly once, with the peer's result or an
/// error.
#[async_trait]
pub trait SidecarTransport: Send + Sync {
    async fn start(&self, events: UnboundedSender<TransportEvent>) -> Result<(), TransportError>;

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;
}
