//! Client-side coordination layer between list-shaped UI views, the ZenML
//! Python sidecar and the analytics collector.

pub mod analytics;
pub mod collections;
pub mod config;
pub mod context;
pub mod event_hub;
pub mod paths;
pub mod readiness;
pub mod sidecar;
pub mod sidecar_log;
pub mod ttl_cache;

pub use config::BridgeConfig;
pub use context::BridgeContext;
