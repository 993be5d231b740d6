//! DevTools Bridge - Desktop host for debugging remote runtimes.
//!
//! This library connects a desktop debugger to runtime agents (mobile apps,
//! simulators, embedded web views) through a multiplexed debug router.
//!
//! # Architecture
//!
//! The host follows a router-mediated model:
//!
//! - **Host (Rust)**: Joins a router room, issues requests, reconciles the
//!   device/session topology, runs plugins
//! - **Router**: Relays frames between the host and the agents in its room
//! - **Agent (device)**: Answers CDP and control requests, pushes rosters
//!
//! Key design principles:
//!
//! - One [`TransportConnection`] per host, identified by monotonically
//!   increasing generations; stale attempts are discarded
//! - Replies are recognized by caller-supplied predicates, not only ids
//! - Roster refreshes are atomic for readers and keep sticky per-session
//!   metadata
//! - Plugins are isolated: a failing plugin never takes down its siblings
//!
//! # Quick Start
//!
//! ```no_run
//! use devtools_bridge::{DebugHost, Endpoint, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let host = DebugHost::builder().build()?;
//!     host.start(Endpoint::new("ws://127.0.0.1:19783", "room-1")).await?;
//!
//!     if let Some(device_id) = host.topology().active_device_id() {
//!         let enabled = host
//!             .session()
//!             .get_global_switch(&device_id, std::time::Duration::from_secs(2))
//!             .await?;
//!         println!("Global debug switch: {enabled}");
//!     }
//!
//!     host.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`host`] | Context object wiring every component |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`plugin`] | Plugin discovery, lifecycle, bridge, custom events |
//! | [`protocol`] | Wire envelope, rosters, reply matchers |
//! | [`session`] | Request correlation and typed commands |
//! | [`topology`] | Device/session reconciliation and selection |
//! | [`transport`] | Router connection and link factories |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Debug host context object.
///
/// Use [`DebugHost::builder()`] to create a configured host.
pub mod host;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Plugin host.
pub mod plugin;

/// Router wire format.
pub mod protocol;

/// Correlation engine.
pub mod session;

/// Device and session topology.
pub mod topology;

/// Router connection layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Host types
pub use host::{DebugHost, DebugHostBuilder, HostOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{
    DeviceId, EventId, Generation, PluginId, RequestId, SessionId, SubscriptionId,
};

// Plugin types
pub use plugin::{
    BridgeTarget, CustomEvent, EventResponse, Hook, HookParams, HookReport, ManifestLoader,
    PluginDescriptor, PluginHost, PluginLoader, PluginMode, PluginSource,
};

// Protocol types
pub use protocol::{Envelope, MatchPredicate};

// Session types
pub use session::DebugSession;

// Topology types
pub use topology::{
    DebugMode, MemorySelectionCache, RemoteDevice, SelectionCache, Session, SessionChange,
    SessionKind, TopologyEvent, TopologyStore,
};

// Transport types
pub use transport::{
    ConnectionHandle, ConnectionState, Connector, Endpoint, MemoryConnector, TransportConnection,
    TransportOptions, WebSocketConnector,
};
