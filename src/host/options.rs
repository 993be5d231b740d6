//! Host-wide timing configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use devtools_bridge::HostOptions;
//!
//! let options = HostOptions::new()
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_request_timeout(Duration::from_secs(10));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::TransportOptions;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for correlated requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// HostOptions
// ============================================================================

/// Timing knobs for every component of a [`super::DebugHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    /// Connection timing.
    pub transport: TransportOptions,

    /// Timeout applied to correlated requests without an explicit one.
    pub request_timeout: Duration,

    /// Send `Page.stopScreencast` to a session before it stops being active.
    pub stop_screencast_on_switch: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl HostOptions {
    /// Creates options with default timings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            transport: TransportOptions::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stop_screencast_on_switch: true,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl HostOptions {
    /// Replaces the transport options.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.transport = self.transport.with_connect_timeout(connect_timeout);
        self
    }

    /// Sets the delay before reconnecting.
    #[inline]
    #[must_use]
    pub fn with_reconnect_backoff(mut self, reconnect_backoff: Duration) -> Self {
        self.transport = self.transport.with_reconnect_backoff(reconnect_backoff);
        self
    }

    /// Sets the default correlated request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Enables or disables the screencast cleanup on session switch.
    #[inline]
    #[must_use]
    pub fn with_stop_screencast_on_switch(mut self, enabled: bool) -> Self {
        self.stop_screencast_on_switch = enabled;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl HostOptions {
    /// Checks that every duration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.transport.connect_timeout.is_zero() {
            return Err(Error::config(
                "Connect timeout must be greater than zero. Use .with_connect_timeout() to set it.",
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::config(
                "Request timeout must be greater than zero. Use .with_request_timeout() to set it.",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
