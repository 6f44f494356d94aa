//! Event hub shared by every bridge component.
//!
//! - **Events (`events.rs`)**: typed payloads plus the name taxonomy.
//! - **Hub (`hub.rs`)**: synchronous, re-entrant publish/subscribe.

pub mod events;
pub mod hub;

#[cfg(test)]
#[path = "tests/hub_tests.rs"]
mod hub_tests;

pub use events::{names, ConnectionStatus, HubEvent, LifecycleState, ServerDetails};
pub use hub::{EventHub, HubError, SubscriptionId};
