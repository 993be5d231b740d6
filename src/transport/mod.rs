//! Router transport layer.
//!
//! This module maintains the single logical connection between the host and
//! a remote debug router.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                          ┌─────────────────┐
//! │ TransportConnection  │                          │  Debug router   │
//! │  generation #n       │        WebSocket         │  (room r1)      │
//! │  ConnectionHandle ───┼─────────────────────────►│  agent, agent…  │
//! │  reconnect timer     │   ws://addr/?room=r1     │                 │
//! └──────────────────────┘                          └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `TransportConnection::connect` - new generation, `Connecting`
//! 2. `Connector::open` - physical link within the connect timeout
//! 3. Publish handle if still the latest generation, `Connected`
//! 4. Close (remote or local) - `Unconnected`, reconnect after backoff if
//!    the endpoint is still desired
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Generation tracking and reconnects |
//! | `handle` | Per-generation handle and event loop |
//! | `memory` | In-memory connector |
//! | `websocket` | WebSocket connector |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Submodules
// ============================================================================

/// Generation tracking and reconnects.
pub mod connection;

/// Per-generation handle and event loop.
pub mod handle;

/// In-memory connector for tests and embedding.
pub mod memory;

/// WebSocket connector.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ConnectionState, OpenHook, TransportConnection, TransportOptions};
pub use handle::{CloseReason, ConnectionHandle, TransportEvent, TransportEventKind, TransportHandler};
pub use memory::{Attempt, MemoryConnector, RemoteEnd};
pub use websocket::WebSocketConnector;

// ============================================================================
// Endpoint
// ============================================================================

/// Router address and room a connection is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Router base URL (`ws://host:port` or `wss://…`).
    pub address: String,
    /// Rendezvous namespace on the router.
    pub room: String,
}

impl Endpoint {
    /// Creates an endpoint.
    #[inline]
    #[must_use]
    pub fn new(address: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            room: room.into(),
        }
    }

    /// Builds the WebSocket URL used to join the room as the host.
    ///
    /// Format: `{address}?room={room}&role=host`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the address is not a `ws`/`wss` URL.
    pub fn ws_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.address)
            .map_err(|e| Error::config(format!("Invalid router address {}: {e}", self.address)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Router address must use ws:// or wss://, got {}",
                self.address
            )));
        }

        url.query_pairs_mut()
            .append_pair("room", &self.room)
            .append_pair("role", "host");

        Ok(url)
    }
}

// ============================================================================
// Link
// ============================================================================

/// One physical, bidirectional text-frame link.
///
/// Dropping `tx` closes the link locally; `rx` yielding `None` means the
/// remote side went away.
#[derive(Debug)]
pub struct Link {
    /// Frames to the router.
    pub tx: mpsc::UnboundedSender<String>,
    /// Frames from the router.
    pub rx: mpsc::UnboundedReceiver<String>,
}

// ============================================================================
// Connector
// ============================================================================

/// Capability that opens physical links to a router.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a link to the endpoint.
    ///
    /// The caller bounds this call with the connect timeout.
    async fn open(&self, endpoint: &Endpoint) -> Result<Link>;
}

// ============================================================================
// Tests
// ============================================================================
