//! Error types for the debug bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use devtools_bridge::{Error, Result};
//!
//! async fn example(session: &DebugSession) -> Result<()> {
//!     let enabled = session.get_global_switch(client_id, timeout).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::Superseded`] |
//! | Protocol | [`Error::Protocol`], [`Error::MalformedPayload`] |
//! | Correlation | [`Error::RequestTimeout`], [`Error::Timeout`], [`Error::ContextReset`] |
//! | Plugins | [`Error::PluginLoad`], [`Error::PluginNotFound`], [`Error::MethodNotFound`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Zip`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;
use zip::result::ZipError;

use crate::identifiers::{Generation, PluginId, RequestId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when host configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport was not established within the connect timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// No open transport, or the transport closed while sending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A newer `connect` call replaced this one before it settled.
    ///
    /// The link that this generation produced has already been torn down.
    #[error("Connection generation {generation} superseded by {latest}")]
    Superseded {
        /// Generation of the discarded attempt.
        generation: Generation,
        /// Latest generation at the time of discard.
        latest: Generation,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected message shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// A payload field could not be decoded.
    ///
    /// Reconciliation tolerates this by keeping the raw value; it only
    /// surfaces from explicit decode helpers.
    #[error("Malformed payload in {field}: {message}")]
    MalformedPayload {
        /// Field that failed to decode.
        field: String,
        /// Decoder message.
        message: String,
    },

    // ========================================================================
    // Correlation Errors
    // ========================================================================
    /// Correlated request got no matching reply in time.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The presentation context was torn down while an invocation waited.
    #[error("Presentation context reset")]
    ContextReset,

    // ========================================================================
    // Plugin Errors
    // ========================================================================
    /// An external plugin failed discovery or instantiation.
    #[error("Failed to load plugin from {}: {message}", source_path.display())]
    PluginLoad {
        /// Location the plugin was loaded from.
        source_path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// No valid plugin with this id.
    #[error("Plugin not found: {plugin_id}")]
    PluginNotFound {
        /// The missing plugin id.
        plugin_id: PluginId,
    },

    /// Bridge dispatch found no plugin exposing the method.
    #[error("Method not found: {plugin_id}.{method}")]
    MethodNotFound {
        /// Plugin id the call was addressed to.
        plugin_id: PluginId,
        /// Requested bridge method.
        method: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Plugin archive error.
    #[error("Archive error: {0}")]
    Zip(#[from] ZipError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a superseded-generation error.
    #[inline]
    pub fn superseded(generation: Generation, latest: Generation) -> Self {
        Self::Superseded { generation, latest }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a malformed payload error.
    #[inline]
    pub fn malformed_payload(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a plugin load error.
    #[inline]
    pub fn plugin_load(source_path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PluginLoad {
            source_path: source_path.into(),
            message: message.into(),
        }
    }

    /// Creates a plugin not found error.
    #[inline]
    pub fn plugin_not_found(plugin_id: PluginId) -> Self {
        Self::PluginNotFound { plugin_id }
    }

    /// Creates a method not found error.
    #[inline]
    pub fn method_not_found(plugin_id: PluginId, method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            plugin_id,
            method: method.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::Timeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Superseded { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this is a plugin error.
    #[inline]
    #[must_use]
    pub fn is_plugin_error(&self) -> bool {
        matches!(
            self,
            Self::PluginLoad { .. } | Self::PluginNotFound { .. } | Self::MethodNotFound { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when the caller re-issues the request.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Superseded { .. }
                | Self::Timeout { .. }
                | Self::RequestTimeout { .. }
                | Self::ContextReset
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("router unreachable");
        assert_eq!(err.to_string(), "Connection failed: router unreachable");
    }

    #[test]
    fn test_method_not_found_display() {
        let err = Error::method_not_found(PluginId::new("network"), "getEntries");
        assert_eq!(err.to_string(), "Method not found: network.getEntries");
    }

    #[test]
    fn test_plugin_load_display() {
        let err = Error::plugin_load("/plugins/trace", "missing plugin.json");
        assert_eq!(
            err.to_string(),
            "Failed to load plugin from /plugins/trace: missing plugin.json"
        );
    }

    #[test]
    fn test_is_timeout() {
        let request_err = Error::request_timeout(RequestId::from_raw(4), 100);
        let invoke_err = Error::timeout("invoke ping", 30_000);
        let other_err = Error::connection("test");

        assert!(request_err.is_timeout());
        assert!(invoke_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        let superseded = Error::superseded(Generation::from_raw(1), Generation::from_raw(2));

        assert!(superseded.is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::connection_timeout(10_000).is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_plugin_error() {
        assert!(Error::plugin_not_found(PluginId::new("x")).is_plugin_error());
        assert!(!Error::ContextReset.is_plugin_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::ContextReset.is_recoverable());
        assert!(!Error::config("test").is_recoverable());
        assert!(!Error::method_not_found(PluginId::new("x"), "y").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
