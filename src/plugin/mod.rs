//! Plugin host.
//!
//! Plugins extend the host UI. Each one is described by an immutable
//! [`PluginDescriptor`] carrying its bridge methods and lifecycle hooks.
//!
//! # Lifecycle
//!
//! 1. `discover` - built-ins, then external sources via [`PluginLoader`]
//! 2. `create` / `show` / `select` - hook fan-out with [`HookParams`], failures isolated
//! 3. `restart` - rediscover, reset custom events, `on_restart`
//! 4. `destroy` - final fan-out
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bridge` | Host-callable methods and dispatch targets |
//! | `descriptor` | Descriptors, sources, hooks |
//! | `events` | Custom event queue and invokes |
//! | `host` | Discovery, lifecycle, dispatch |
//! | `loader` | Manifest-based loading |

// ============================================================================
// Submodules
// ============================================================================

/// Host-callable methods.
pub mod bridge;

/// Descriptors, sources, hooks.
pub mod descriptor;

/// Custom event queue and invokes.
pub mod events;

/// Discovery, lifecycle, dispatch.
pub mod host;

/// Manifest-based loading.
pub mod loader;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{BridgeMethod, BridgeTable, BridgeTarget};
pub use descriptor::{
    Hook, HookFn, HookParams, LifecycleHooks, PluginDescriptor, PluginMode, PluginSource,
};
pub use events::{CustomEvent, EventBus, EventResponse, EventSink};
pub use host::{BuiltinFactory, HookReport, PluginHost};
pub use loader::{MANIFEST_FILE, ManifestLoader, PluginFactory, PluginLoader, PluginManifest};
