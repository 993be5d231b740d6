//! Router protocol message types.
//!
//! This module defines the frames exchanged between the host (Rust) and the
//! debug router that multiplexes device agents.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `Customized` | Host ↔ Agent | Typed channel payload (CDP, switches, screenshots) |
//! | `RoomClients` | Router → Host | Device roster snapshot |
//! | `Customized`/`ListSession` | Agent → Host | Session roster snapshot |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Envelope type and well-known kinds |
//! | `matcher` | Per-kind reply matching predicates |
//! | `roster` | Device and session roster payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope type and well-known kinds.
pub mod envelope;

/// Reply matching predicates.
pub mod matcher;

/// Roster payloads.
pub mod roster;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{Envelope, kind};
pub use matcher::MatchPredicate;
pub use roster::{WireDevice, WireDeviceInfo, WireSession, parse_device_roster, parse_session_roster};
