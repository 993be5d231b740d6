//! Reply matching rules.
//!
//! The correlation engine only allocates ids and keeps books; deciding
//! whether an incoming frame answers a request is up to the caller. Each
//! message kind carries its correlation signal differently:
//!
//! | Kind | Rule |
//! |------|------|
//! | `CDP` | nested `message.id` equals the request id |
//! | `GetGlobalSwitch`, `SetGlobalSwitch` | same type and same client |
//! | `Screenshot` | same type, client, session, and `message.method` |
//!
//! The type-and-client rule has no id check: two requests of the same kind
//! in flight for one client are both satisfied by the first reply.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::identifiers::{DeviceId, RequestId, SessionId};

use super::Envelope;

// ============================================================================
// Types
// ============================================================================

/// Predicate deciding whether a frame answers a pending request.
pub type MatchPredicate = Box<dyn Fn(&Envelope) -> bool + Send + Sync>;

// ============================================================================
// Builders
// ============================================================================

/// Matches a CDP reply by the echoed request id.
#[must_use]
pub fn cdp_reply(client_id: DeviceId, request_id: RequestId) -> MatchPredicate {
    Box::new(move |frame| {
        frame.kind() == super::kind::CDP
            && frame.client_id().as_ref() == Some(&client_id)
            && frame
                .message()
                .and_then(|m| m.get("id").and_then(Value::as_u64))
                == Some(request_id.as_u64())
    })
}

/// Matches the first frame of a given type from a given client.
#[must_use]
pub fn type_and_client(message_type: &'static str, client_id: DeviceId) -> MatchPredicate {
    Box::new(move |frame| {
        frame.kind() == message_type && frame.client_id().as_ref() == Some(&client_id)
    })
}

/// Matches a reply carrying the request's method name for one session.
#[must_use]
pub fn method_and_session(
    message_type: &'static str,
    client_id: DeviceId,
    session_id: SessionId,
    method: impl Into<String>,
) -> MatchPredicate {
    let method = method.into();
    Box::new(move |frame| {
        frame.kind() == message_type
            && frame.client_id().as_ref() == Some(&client_id)
            && frame.session_id() == Some(session_id)
            && frame
                .message()
                .and_then(|m| m.get("method").and_then(Value::as_str).map(str::to_owned))
                .as_deref()
                == Some(method.as_str())
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::kind;

    fn device() -> DeviceId {
        DeviceId::from(7)
    }

    #[test]
    fn test_cdp_reply_matches_echoed_id_only() {
        let id = RequestId::from_raw(41);
        let matcher = cdp_reply(device(), id);

        let reply = Envelope::customized(kind::CDP, &device(), Some(SessionId::new(1)), json!({"id": 41, "result": {}}));
        let other = Envelope::customized(kind::CDP, &device(), Some(SessionId::new(1)), json!({"id": 42, "result": {}}));
        let event = Envelope::customized(kind::CDP, &device(), Some(SessionId::new(1)), json!({"method": "Runtime.consoleAPICalled"}));

        assert!(matcher(&reply));
        assert!(!matcher(&other));
        assert!(!matcher(&event));
    }

    #[test]
    fn test_cdp_reply_ignores_other_client() {
        let id = RequestId::from_raw(5);
        let matcher = cdp_reply(device(), id);
        let reply = Envelope::customized(kind::CDP, &DeviceId::from(8), None, json!({"id": 5}));
        assert!(!matcher(&reply));
    }

    #[test]
    fn test_type_and_client_has_no_id_check() {
        let matcher = type_and_client(kind::GET_GLOBAL_SWITCH, device());
        let reply = Envelope::customized(kind::GET_GLOBAL_SWITCH, &device(), None, json!({"enabled": true}));
        let wrong_type = Envelope::customized(kind::SET_GLOBAL_SWITCH, &device(), None, json!({}));

        assert!(matcher(&reply));
        assert!(!matcher(&wrong_type));
    }

    #[test]
    fn test_method_and_session() {
        let matcher = method_and_session(kind::SCREENSHOT, device(), SessionId::new(3), "Page.captureScreenshot");

        let reply = Envelope::customized(kind::SCREENSHOT, &device(), Some(SessionId::new(3)), json!({"method": "Page.captureScreenshot", "data": "aGk="}));
        let other_session = Envelope::customized(kind::SCREENSHOT, &device(), Some(SessionId::new(4)), json!({"method": "Page.captureScreenshot"}));
        let other_method = Envelope::customized(kind::SCREENSHOT, &device(), Some(SessionId::new(3)), json!({"method": "Page.startScreencast"}));

        assert!(matcher(&reply));
        assert!(!matcher(&other_session));
        assert!(!matcher(&other_method));
    }
}
