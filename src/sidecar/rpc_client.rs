//! The single client of the sidecar process.
//!
//! Owns the lifecycle state and re-broadcasts it, together with the
//! sidecar's notifications, on the event hub.

use super::error::RpcError;
use super::protocol::{
    classify_response, execute_command_params, hub_events_for_notification, is_known_method,
    EXECUTE_COMMAND,
};
use super::transport::{SidecarTransport, TransportEvent};
use crate::event_hub::{EventHub, HubEvent, LifecycleState};
use crate::sidecar_log::sidecar_log;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle state shared between the client and its notification pump.
struct Lifecycle {
    hub: Arc<EventHub>,
    state: StdMutex<LifecycleState>,
}

impl Lifecycle {
    fn get(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `next` and broadcasts it. Setting the current state again
    /// is silent.
    fn set(&self, next: LifecycleState) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, next)
        };
        if previous == next {
            return;
        }
        info!(from = %previous, to = %next, "sidecar lifecycle");
        if let Err(e) = self.hub.emit(HubEvent::LifecycleChanged(next)) {
            warn!(error = %e, "lifecycle subscriber failed");
        }
    }
}

pub struct RpcClient {
    transport: Arc<dyn SidecarTransport>,
    hub: Arc<EventHub>,
    lifecycle: Arc<Lifecycle>,
    pump: StdMutex<Option<JoinHandle<()>>>,
    /// Serializes start/stop/restart.
    control: Mutex<()>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn SidecarTransport>, hub: Arc<EventHub>) -> Self {
        let lifecycle = Arc::new(Lifecycle {
            hub: Arc::clone(&hub),
            state: StdMutex::new(LifecycleState::Stopped),
        });
        Self {
            transport,
            hub,
            lifecycle,
            pump: StdMutex::new(None),
            control: Mutex::new(()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    /// Starts the sidecar: `Stopped -> Starting -> Running`, or back to
    /// `Stopped` if the handshake fails. A no-op while already running.
    pub async fn start(&self) -> Result<(), RpcError> {
        let _control = self.control.lock().await;
        if self.lifecycle.get() == LifecycleState::Running {
            return Ok(());
        }

        self.lifecycle.set(LifecycleState::Starting);
        self.abort_pump();

        let (events_tx, events_rx) = unbounded_channel();
        if let Err(e) = self.transport.start(events_tx).await {
            warn!(error = %e, "sidecar failed to start");
            sidecar_log("rpc_client", &format!("start failed: {}", e));
            self.lifecycle.set(LifecycleState::Stopped);
            return Err(RpcError::Transport {
                message: e.to_string(),
            });
        }

        self.lifecycle.set(LifecycleState::Running);
        let handle = tokio::spawn(pump_events(
            events_rx,
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.hub),
        ));
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stops the sidecar and moves to `Stopped`.
    pub async fn stop(&self) -> Result<(), RpcError> {
        let _control = self.control.lock().await;
        self.abort_pump();
        let result = self.transport.stop().await;
        self.lifecycle.set(LifecycleState::Stopped);
        result.map_err(|e| RpcError::Transport {
            message: e.to_string(),
        })
    }

    pub async fn restart(&self) -> Result<(), RpcError> {
        info!("restarting sidecar");
        if let Err(e) = self.stop().await {
            warn!(error = %e, "sidecar stop during restart failed");
        }
        self.start().await
    }

    /// Sends `method(args...)` to the sidecar.
    ///
    /// Every outcome is a value: the success payload, or an [`RpcError`] for
    /// a non-running transport, an unknown method, an `{error}` reply, a
    /// version mismatch, or a transport failure.
    pub async fn send_request(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        let state = self.lifecycle.get();
        if state != LifecycleState::Running {
            return Err(RpcError::NotRunning { state });
        }
        if !is_known_method(method) {
            return Err(RpcError::UnknownMethod {
                method: method.to_string(),
            });
        }

        debug!(method, args = args.len(), "sidecar request");
        let raw = self
            .transport
            .request(EXECUTE_COMMAND, execute_command_params(method, args))
            .await
            .map_err(|e| RpcError::from_transport(method, e))?;
        classify_response(raw)
    }

    /// [`send_request`](Self::send_request) decoded into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.send_request(method, args).await?;
        serde_json::from_value(value).map_err(|e| RpcError::MalformedResponse {
            method: method.to_string(),
            message: e.to_string(),
        })
    }

    fn abort_pump(&self) {
        if let Some(handle) = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.abort_pump();
    }
}

async fn pump_events(
    mut events: UnboundedReceiver<TransportEvent>,
    lifecycle: Arc<Lifecycle>,
    hub: Arc<EventHub>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Notification { method, params } => {
                debug!(%method, "sidecar notification");
                for hub_event in hub_events_for_notification(&method, &params) {
                    if let Err(e) = hub.emit(hub_event) {
                        warn!(error = %e, %method, "notification subscriber failed");
                    }
                }
            }
            TransportEvent::Exited { reason } => {
                warn!(%reason, "sidecar exited");
                lifecycle.set(LifecycleState::Stopped);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/rpc_client_tests.rs"]
mod tests;
