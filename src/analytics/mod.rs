//! Best-effort telemetry.
//!
//! - **Event (`event.rs`)**: batch element shape and environment metadata.
//! - **Identity (`identity.rs`)**: persisted anonymous id.
//! - **Sender (`sender.rs`)**: HTTP delivery of one batch.
//! - **Connection (`connection.rs`)**: connection-type classification and
//!   connect/disconnect transition tracking.
//! - **Batcher (`batcher.rs`)**: bounded queue, flushing, hub wiring.

pub mod batcher;
pub mod connection;
pub mod event;
pub mod identity;
pub mod sender;

pub use batcher::{
    AnalyticsBatcher, AnalyticsSettings, AnalyticsStats, FlushOutcome, FlushReason, TrackOutcome,
};
pub use connection::{
    classify_connection, ConnectionTracker, ConnectionTransition, ConnectionType,
    DisconnectReason,
};
pub use event::{AnalyticsEvent, EnvironmentMetadata};
pub use sender::{AnalyticsError, AnalyticsSender, HttpSender};

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod connection_tests;

#[cfg(test)]
#[path = "tests/event_tests.rs"]
mod event_tests;

#[cfg(test)]
#[path = "tests/batcher_tests.rs"]
mod batcher_tests;
