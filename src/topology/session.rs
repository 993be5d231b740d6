//! Debuggable sessions of one device.

// ============================================================================
// Imports
// ============================================================================

use tracing::warn;

use crate::identifiers::SessionId;
use crate::protocol::WireSession;

// ============================================================================
// SessionKind
// ============================================================================

/// Kind of debuggable context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionKind {
    /// The app's primary script runtime.
    PrimaryRuntime,
    /// A web view.
    #[default]
    Web,
    /// A background worker.
    Worker,
}

impl SessionKind {
    /// Parses the wire `type` field. Unknown or missing values mean [`Self::Web`].
    #[must_use]
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("primary-runtime" | "main" | "runtime") => Self::PrimaryRuntime,
            Some("worker") => Self::Worker,
            _ => Self::Web,
        }
    }

    /// Returns the wire name.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryRuntime => "primary-runtime",
            Self::Web => "web",
            Self::Worker => "worker",
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One debuggable context on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session id, unique within the device.
    pub id: SessionId,
    /// Decoded URL.
    pub url: String,
    /// Context kind.
    pub kind: SessionKind,
    /// Last screenshot, kept across roster refreshes.
    pub screenshot_cache: Option<String>,
    /// Script engine, kept across roster refreshes.
    pub engine_kind: Option<String>,
}

impl Session {
    /// Builds a session from a roster entry, carrying cached fields forward
    /// from the previous record with the same id.
    #[must_use]
    pub fn from_wire(wire: WireSession, previous: Option<&Session>) -> Self {
        Self {
            id: wire.session_id,
            url: decode_url(&wire.url),
            kind: SessionKind::from_wire(wire.kind.as_deref()),
            screenshot_cache: wire
                .screenshot
                .or_else(|| previous.and_then(|p| p.screenshot_cache.clone())),
            engine_kind: wire
                .engine
                .or_else(|| previous.and_then(|p| p.engine_kind.clone())),
        }
    }

    /// Returns `true` if the URL contains the filter (case-insensitive).
    ///
    /// An empty filter matches everything.
    #[must_use]
    pub fn matches_filter(&self, filter: &str) -> bool {
        filter.is_empty() || self.url.to_lowercase().contains(&filter.to_lowercase())
    }
}

/// Percent-decodes a session URL, keeping the raw text when decoding fails.
fn decode_url(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            warn!(url = raw, error = %e, "Session URL is not valid percent-encoding, keeping raw value");
            raw.to_owned()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(id: u64, url: &str) -> WireSession {
        WireSession {
            session_id: SessionId::new(id),
            url: url.into(),
            kind: None,
            engine: None,
            screenshot: None,
        }
    }

    #[test]
    fn test_kind_from_wire() {
        assert_eq!(SessionKind::from_wire(Some("primary-runtime")), SessionKind::PrimaryRuntime);
        assert_eq!(SessionKind::from_wire(Some("Worker")), SessionKind::Worker);
        assert_eq!(SessionKind::from_wire(Some("something")), SessionKind::Web);
        assert_eq!(SessionKind::from_wire(None), SessionKind::Web);
    }

    #[test]
    fn test_url_is_decoded() {
        let session = Session::from_wire(wire(1, "http%3A%2F%2Fx%2Fa%20b"), None);
        assert_eq!(session.url, "http://x/a b");
    }

    #[test]
    fn test_malformed_url_keeps_raw() {
        let session = Session::from_wire(wire(1, "http://x/%FF"), None);
        assert_eq!(session.url, "http://x/%FF");
    }

    #[test]
    fn test_carry_forward() {
        let previous = Session {
            id: SessionId::new(1),
            url: "old".into(),
            kind: SessionKind::Web,
            screenshot_cache: Some("img".into()),
            engine_kind: Some("v8".into()),
        };

        let session = Session::from_wire(wire(1, "new"), Some(&previous));
        assert_eq!(session.url, "new");
        assert_eq!(session.screenshot_cache.as_deref(), Some("img"));
        assert_eq!(session.engine_kind.as_deref(), Some("v8"));

        let mut fresh = wire(1, "new");
        fresh.engine = Some("quickjs".into());
        let session = Session::from_wire(fresh, Some(&previous));
        assert_eq!(session.engine_kind.as_deref(), Some("quickjs"));
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let session = Session::from_wire(wire(1, "http://Example.com/Page"), None);
        assert!(session.matches_filter(""));
        assert!(session.matches_filter("example"));
        assert!(session.matches_filter("PAGE"));
        assert!(!session.matches_filter("other"));
    }
}
