//! Everything that talks to the sidecar process.

pub mod commands;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod rpc_client;
pub mod stdio_transport;
pub mod transport;

pub use commands::SidecarCommands;
pub use error::{RpcError, TransportError};
pub use rpc_client::RpcClient;
pub use stdio_transport::{StdioTransport, StdioTransportConfig};
pub use transport::{SidecarTransport, TransportEvent};

#[cfg(test)]
#[path = "tests/mock_transport.rs"]
pub(crate) mod mock_transport;
