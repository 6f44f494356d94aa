//! Scripted in-memory sidecar for tests.

use crate::event_hub::EventHub;
use crate::sidecar::error::{TransportError, METHOD_NOT_FOUND};
use crate::sidecar::protocol::COMMAND_PREFIX;
use crate::sidecar::rpc_client::RpcClient;
use crate::sidecar::transport::{SidecarTransport, TransportEvent};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;

type Responder = Arc<dyn Fn(&[Value]) -> Result<Value, TransportError> + Send + Sync>;

#[derive(Default)]
pub struct MockTransport {
    responders: Mutex<HashMap<String, Responder>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    events: Mutex<Option<UnboundedSender<TransportEvent>>>,
    next_start_error: Mutex<Option<TransportError>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers `method` with a fixed value.
    pub fn respond(&self, method: &str, value: Value) {
        self.respond_with(method, move |_| Ok(value.clone()));
    }

    pub fn respond_with<F>(&self, method: &str, responder: F)
    where
        F: Fn(&[Value]) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        self.responders
            .lock()
            .unwrap()
            .insert(method.to_string(), Arc::new(responder));
    }

    pub fn fail_next_start(&self, err: TransportError) {
        *self.next_start_error.lock().unwrap() = Some(err);
    }

    /// Holds every request until a permit is added to the returned gate.
    pub fn hold_requests(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Pushes a sidecar notification to the client.
    pub fn notify(&self, method: &str, params: Value) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(TransportEvent::Notification {
                method: method.to_string(),
                params,
            });
        }
    }

    /// Simulates the sidecar process dying.
    pub fn crash(&self, reason: &str) {
        if let Some(tx) = self.events.lock().unwrap().take() {
            let _ = tx.send(TransportEvent::Exited {
                reason: reason.to_string(),
            });
        }
    }
}

#[async_trait]
impl SidecarTransport for MockTransport {
    async fn start(&self, events: UnboundedSender<TransportEvent>) -> Result<(), TransportError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_start_error.lock().unwrap().take() {
            return Err(err);
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let command = params["command"].as_str().unwrap_or(method).to_string();
        let command = command
            .strip_prefix(&format!("{}.", COMMAND_PREFIX))
            .unwrap_or(&command)
            .to_string();
        let args = params["arguments"].as_array().cloned().unwrap_or_default();
        self.calls.lock().unwrap().push((command.clone(), args.clone()));

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.map_err(|_| TransportError::Closed)?;
            permit.forget();
        }

        let responder = self.responders.lock().unwrap().get(&command).cloned();
        match responder {
            Some(responder) => responder(&args),
            None => Err(TransportError::Remote {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {}", command),
            }),
        }
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().take();
        Ok(())
    }
}

/// A hub plus a started client backed by a fresh mock.
pub async fn running_client() -> (Arc<EventHub>, Arc<RpcClient>, Arc<MockTransport>) {
    let hub = Arc::new(EventHub::new());
    let transport = MockTransport::new();
    let client = Arc::new(RpcClient::new(transport.clone(), Arc::clone(&hub)));
    client.start().await.unwrap();
    (hub, client, transport)
}

/// Lets spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
