//! Composition root.
//!
//! One `BridgeContext` per process owns the hub, the RPC client, the
//! readiness gate, the analytics batcher and one provider per collection.
//! Nothing here is a hidden global; callers hold the context and pass it on.

use crate::analytics::AnalyticsBatcher;
use crate::collections::{builtin_source, CollectionProvider, Poller, BUILTIN_SOURCES};
use crate::config::BridgeConfig;
use crate::event_hub::{names, EventHub, HubEvent, SubscriptionId};
use crate::readiness::ReadinessCoordinator;
use crate::sidecar::{RpcClient, RpcError, SidecarCommands, SidecarTransport, StdioTransport};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, info, warn};

/// Events after which cached collection pages may be stale.
const DOMAIN_EVENTS: [&str; 3] = [
    names::ACTIVE_STACK_CHANGED,
    names::ACTIVE_PROJECT_CHANGED,
    names::SERVER_CHANGED,
];

pub struct BridgeContext {
    config: BridgeConfig,
    hub: Arc<EventHub>,
    rpc: Arc<RpcClient>,
    commands: SidecarCommands,
    readiness: Arc<ReadinessCoordinator>,
    analytics: Arc<AnalyticsBatcher>,
    providers: BTreeMap<&'static str, Arc<CollectionProvider>>,
    pollers: Mutex<Vec<Poller>>,
    subscriptions: Mutex<Vec<(&'static str, SubscriptionId)>>,
}

impl BridgeContext {
    /// Builds the production graph: stdio sidecar and HTTP analytics.
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let transport = Arc::new(StdioTransport::new(config.sidecar.transport_config()));
        let analytics = AnalyticsBatcher::from_settings(config.analytics.settings());
        Self::with_parts(config, transport, analytics)
    }

    pub fn with_parts(
        config: BridgeConfig,
        transport: Arc<dyn SidecarTransport>,
        analytics: Arc<AnalyticsBatcher>,
    ) -> Arc<Self> {
        let hub = Arc::new(EventHub::new());
        let rpc = Arc::new(RpcClient::new(transport, Arc::clone(&hub)));
        let commands = SidecarCommands::new(Arc::clone(&rpc), Arc::clone(&hub));
        let readiness = ReadinessCoordinator::attach(Arc::clone(&hub));
        analytics.attach(&hub);

        let ttl = config.collections.refresh_interval();
        let per_page = config.collections.items_per_page;
        let providers = BUILTIN_SOURCES
            .iter()
            .filter_map(|name| builtin_source(name).map(|source| (*name, source)))
            .map(|(name, source)| {
                let provider = CollectionProvider::new(
                    source,
                    Arc::clone(&rpc),
                    Arc::clone(&readiness),
                    ttl,
                    per_page,
                );
                (name, Arc::new(provider))
            })
            .collect();

        let context = Arc::new(Self {
            config,
            hub,
            rpc,
            commands,
            readiness,
            analytics,
            providers,
            pollers: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        });
        context.subscribe();
        context
    }

    fn subscribe(self: &Arc<Self>) {
        let mut subscriptions = Vec::new();

        let weak = Arc::downgrade(self);
        let readiness = self.hub.on(names::READINESS_CHANGED, move |event| {
            if let (Some(context), HubEvent::ReadinessChanged(ready)) = (weak.upgrade(), event) {
                context.on_readiness_changed(*ready);
            }
            Ok(())
        });
        subscriptions.push((names::READINESS_CHANGED, readiness));

        for name in DOMAIN_EVENTS {
            let weak: Weak<Self> = Arc::downgrade(self);
            let id = self.hub.on(name, move |event| {
                if let Some(context) = weak.upgrade() {
                    context.on_domain_change(event.name());
                }
                Ok(())
            });
            subscriptions.push((name, id));
        }

        *self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = subscriptions;
    }

    fn on_readiness_changed(&self, ready: bool) {
        info!(ready, "services readiness changed");
        if ready {
            for provider in self.providers.values() {
                spawn_refresh(provider);
            }
        } else {
            for provider in self.providers.values() {
                provider.show_unavailable();
            }
        }
    }

    fn on_domain_change(&self, event: &str) {
        for (name, provider) in &self.providers {
            if provider.source().invalidated_by().contains(&event) {
                debug!(collection = *name, event, "invalidating");
                provider.invalidate();
                spawn_refresh(provider);
            }
        }
    }

    /// Starts the sidecar, the analytics interval and one poller per collection.
    pub async fn start(&self) -> Result<(), RpcError> {
        self.analytics.start();
        self.rpc.start().await?;

        let interval = self.config.collections.refresh_interval();
        let mut pollers = self.pollers.lock().unwrap_or_else(PoisonError::into_inner);
        if pollers.is_empty() {
            for provider in self.providers.values() {
                pollers.push(Poller::spawn(
                    Arc::clone(provider),
                    self.readiness.subscribe(),
                    interval,
                ));
            }
        }
        Ok(())
    }

    /// Refreshes every collection concurrently and waits for all of them.
    pub async fn refresh_all(&self) {
        join_all(self.providers.values().map(|provider| provider.refresh())).await;
    }

    /// Stops polling, drains analytics and shuts the sidecar down.
    pub async fn shutdown(&self) {
        let pollers = std::mem::take(
            &mut *self.pollers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for poller in &pollers {
            poller.stop();
        }
        drop(pollers);

        if let Err(e) = self.analytics.dispose().await {
            debug!("final analytics flush failed: {}", e);
        }
        if let Err(e) = self.rpc.stop().await {
            warn!("sidecar shutdown failed: {}", e);
        }
        self.detach();
    }

    fn detach(&self) {
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

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    pub fn commands(&self) -> &SidecarCommands {
        &self.commands
    }

    pub fn readiness(&self) -> &Arc<ReadinessCoordinator> {
        &self.readiness
    }

    pub fn analytics(&self) -> &Arc<AnalyticsBatcher> {
        &self.analytics
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<CollectionProvider>> {
        self.providers.get(name)
    }

    pub fn providers(&self) -> impl Iterator<Item = (&'static str, &Arc<CollectionProvider>)> {
        self.providers.iter().map(|(name, provider)| (*name, provider))
    }

    pub fn active_pollers(&self) -> usize {
        self.pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| !p.is_finished())
            .count()
    }
}

/// Runs a refresh in the background; overlapping requests coalesce inside
/// the provider.
fn spawn_refresh(provider: &Arc<CollectionProvider>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(
            collection = provider.source().label(),
            "no runtime available for refresh"
        );
        return;
    };
    let provider = Arc::clone(provider);
    runtime.spawn(async move { provider.refresh().await });
}

#[cfg(test)]
#[path = "tests/context_tests.rs"]
mod tests;
