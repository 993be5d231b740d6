//! Devices, sessions and the active selection.
//!
//! The router pushes full snapshots: a device roster for the room and, per
//! device, a session roster. [`TopologyStore`] reconciles those snapshots
//! into a stable model whose device records survive refreshes.
//!
//! # Identity
//!
//! | Key | Used when |
//! |-----|-----------|
//! | device id | always tried first |
//! | `(appId, deviceUid)` | id missing or rotated |
//! | router id | router provides a stable id |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cache` | Persisted selection |
//! | `device` | Device records and identity |
//! | `session` | Session records |
//! | `store` | Reconciliation and selection |

// ============================================================================
// Submodules
// ============================================================================

/// Persisted selection.
pub mod cache;

/// Device records and identity.
pub mod device;

/// Session records.
pub mod session;

/// Reconciliation and selection.
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use cache::{MemorySelectionCache, SelectionCache};
pub use device::{DeviceIdentity, DeviceInfo, RemoteDevice, SharedDevice};
pub use session::{Session, SessionKind};
pub use store::{DebugMode, SessionChange, SessionWillChangeListener, TopologyEvent, TopologyStore};
