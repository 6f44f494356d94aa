//! Periodic refresh that only runs while the services are ready.

use super::provider::CollectionProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Handle to a polling task. Dropping it stops the task.
pub struct Poller {
    handle: JoinHandle<()>,
}

impl Poller {
    /// Refreshes `provider` every `interval` while `ready` is true. Polling
    /// pauses the moment readiness drops and resumes when it returns; the
    /// first tick after resuming waits a full interval, since the readiness
    /// flip itself triggers a refresh.
    pub fn spawn(
        provider: Arc<CollectionProvider>,
        ready: watch::Receiver<bool>,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(poll(provider, ready, interval));
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn poll(
    provider: Arc<CollectionProvider>,
    mut ready: watch::Receiver<bool>,
    interval: Duration,
) {
    let label = provider.source().label();
    loop {
        while !*ready.borrow_and_update() {
            if ready.changed().await.is_err() {
                return;
            }
        }
        debug!(source = label, "polling resumed");

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => provider.refresh().await,
                changed = ready.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*ready.borrow_and_update() {
                        debug!(source = label, "polling paused");
                        break;
                    }
                }
            }
        }
    }
}
