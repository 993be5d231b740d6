//! Request/reply correlation and unsolicited frame dispatch.
//!
//! [`DebugSession`] turns the fire-and-forget transport into awaitable
//! requests. Each request kind carries its own reply rule, supplied by
//! [`crate::protocol::matcher`].
//!
//! # Example
//!
//! ```ignore
//! let session = DebugSession::new(transport.clone());
//! let value = session
//!     .send_cdp(&client_id, session_id, "Runtime.evaluate", json!({ "expression": "1+1" }))
//!     .await?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `correlation` | Pending set, dispatch, subscriptions |
//! | `commands` | Typed CDP, switch and screenshot requests |

// ============================================================================
// Submodules
// ============================================================================

/// Pending set, dispatch, subscriptions.
pub mod correlation;

/// Typed requests.
pub mod commands;

// ============================================================================
// Re-exports
// ============================================================================

pub use commands::SCREENSHOT_METHOD;
pub use correlation::{DebugSession, FrameHandler};
