//! In-process publish/subscribe keyed by event name.

use super::events::HubEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Error raised by a handler. Propagates unchanged to the emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubError {
    pub event: String,
    pub message: String,
}

impl HubError {
    pub fn new(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler for '{}' failed: {}", self.event, self.message)
    }
}

impl std::error::Error for HubError {}

/// Handle returned by [`EventHub::on`], used to remove that one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&HubEvent) -> Result<(), HubError> + Send + Sync>;

/// Process-wide event hub.
///
/// `emit` runs every handler registered for the event's name, in
/// registration order, before returning. The handler list is snapshotted
/// first, so handlers may emit, subscribe or unsubscribe re-entrantly.
/// Registering the same closure twice makes it fire twice.
pub struct EventHub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `handler` for events named `name`.
    pub fn on<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&HubEvent) -> Result<(), HubError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes one registration, or every registration for `name` when `id`
    /// is `None`. Returns how many handlers were removed.
    pub fn off(&self, name: &str, id: Option<SubscriptionId>) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = subscribers.get_mut(name) else {
            return 0;
        };
        let before = handlers.len();
        match id {
            Some(id) => handlers.retain(|(existing, _)| *existing != id),
            None => handlers.clear(),
        }
        let removed = before - handlers.len();
        if handlers.is_empty() {
            subscribers.remove(name);
        }
        removed
    }

    /// Delivers `event` synchronously to every current subscriber of its name.
    ///
    /// Stops at the first failing handler and returns its error.
    pub fn emit(&self, event: HubEvent) -> Result<(), HubError> {
        let handlers: Vec<Handler> = {
            let subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match subscribers.get(event.name()) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => Vec::new(),
            }
        };

        trace!(event = event.name(), handlers = handlers.len(), "emit");
        for handler in handlers {
            handler(&event)?;
        }
        Ok(())
    }

    /// Number of handlers currently registered for `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, Vec::len)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
