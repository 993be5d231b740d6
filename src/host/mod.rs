//! Debug host module.
//!
//! This module provides the main entry point: an explicitly constructed
//! context object owning the transport, the correlation engine, the
//! topology store and the plugin host.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DebugHost`] | Component owner and frame router |
//! | [`DebugHostBuilder`] | Fluent configuration builder |
//! | [`HostOptions`] | Timing configuration |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for host configuration.
pub mod builder;

/// Core host implementation.
pub mod core;

/// Host timing options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::DebugHostBuilder;
pub use core::DebugHost;
pub use options::HostOptions;
