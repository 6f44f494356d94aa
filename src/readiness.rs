//! Two-flag gate in front of every data fetch.
//!
//! Transport-ready follows the RPC client's lifecycle (`Running`).
//! Service-ready follows the sidecar's own initialized notification and is
//! cleared whenever the transport leaves `Running`, since a restarted
//! sidecar announces itself again. Readiness is the conjunction; it is
//! broadcast as `readiness-changed` only when the conjunction flips.

use crate::event_hub::{names, EventHub, HubEvent, LifecycleState, SubscriptionId};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Flags {
    transport_ready: bool,
    service_ready: bool,
}

impl Flags {
    fn ready(self) -> bool {
        self.transport_ready && self.service_ready
    }
}

pub struct ReadinessCoordinator {
    hub: Arc<EventHub>,
    flags: Mutex<Flags>,
    ready_tx: watch::Sender<bool>,
    subscriptions: Mutex<Vec<(&'static str, SubscriptionId)>>,
}

impl ReadinessCoordinator {
    /// Creates the coordinator and subscribes it to the hub.
    pub fn attach(hub: Arc<EventHub>) -> Arc<Self> {
        let (ready_tx, _) = watch::channel(false);
        let coordinator = Arc::new(Self {
            hub: Arc::clone(&hub),
            flags: Mutex::new(Flags::default()),
            ready_tx,
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&coordinator);
        let lifecycle = hub.on(names::LIFECYCLE_CHANGED, move |event| {
            let (Some(this), HubEvent::LifecycleChanged(state)) = (Weak::upgrade(&weak), event)
            else {
                return Ok(());
            };
            let running = *state == LifecycleState::Running;
            this.update(|flags| {
                flags.transport_ready = running;
                if !running {
                    flags.service_ready = false;
                }
            })
        });

        let weak = Arc::downgrade(&coordinator);
        let initialized = hub.on(names::SERVICE_INITIALIZED, move |event| {
            let (Some(this), HubEvent::ServiceInitialized(ready)) = (Weak::upgrade(&weak), event)
            else {
                return Ok(());
            };
            let ready = *ready;
            this.update(|flags| flags.service_ready = ready)
        });

        *coordinator
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = vec![
            (names::LIFECYCLE_CHANGED, lifecycle),
            (names::SERVICE_INITIALIZED, initialized),
        ];
        coordinator
    }

    fn update<F>(&self, change: F) -> Result<(), crate::event_hub::HubError>
    where
        F: FnOnce(&mut Flags),
    {
        let (before, after) = {
            let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
            let before = *flags;
            change(&mut flags);
            (before, *flags)
        };
        debug!(
            transport_ready = after.transport_ready,
            service_ready = after.service_ready,
            "readiness flags"
        );

        if before.ready() == after.ready() {
            return Ok(());
        }
        let ready = after.ready();
        self.ready_tx.send_replace(ready);
        self.hub.emit(HubEvent::ReadinessChanged(ready))
    }

    /// True only while both the transport and the service are ready.
    pub fn is_ready(&self) -> bool {
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ready()
    }

    pub fn transport_ready(&self) -> bool {
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transport_ready
    }

    pub fn service_ready(&self) -> bool {
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .service_ready
    }

    /// Receiver that observes every readiness flip.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Removes this coordinator's hub subscriptions.
    pub fn detach(&self) {
        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (name, id) in subscriptions {
            self.hub.off(name, Some(id));
        }
    }
}

impl Drop for ReadinessCoordinator {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
#[path = "tests/readiness_tests.rs"]
mod tests;
