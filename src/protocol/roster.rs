//! Roster snapshots pushed by the router.
//!
//! # Device roster
//!
//! ```json
//! { "event": "RoomClients", "data": [
//!     { "id": 7, "routerId": "r-1", "connected": true,
//!       "info": { "model": "Pixel 8", "osType": "Android", "appId": "com.demo",
//!                 "appVersion": "1.0", "isMainProcess": true, "deviceUid": "abc" } }
//! ] }
//! ```
//!
//! # Session roster
//!
//! A `Customized` frame of type `ListSession` whose `message` is the list of
//! sessions (either inline or as a JSON string):
//!
//! ```json
//! [ { "session_id": 2, "url": "http%3A%2F%2Fx", "type": "web", "engine": "v8" } ]
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::identifiers::{DeviceId, SessionId};

use super::{Envelope, kind};

// ============================================================================
// WireDevice
// ============================================================================

/// One device entry as sent by the router.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDevice {
    /// Router-assigned id. May be missing for half-registered agents.
    #[serde(default)]
    pub id: Option<DeviceId>,

    /// Stable id assigned by the router across reconnects.
    #[serde(default)]
    pub router_id: Option<String>,

    /// Agent description.
    #[serde(default)]
    pub info: WireDeviceInfo,

    /// Whether the agent currently holds a live link to the router.
    #[serde(default = "default_connected")]
    pub connected: bool,

    /// Placeholder entry announced for a simulator that has no app yet.
    #[serde(default)]
    pub simulator: bool,
}

/// Agent description inside a [`WireDevice`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDeviceInfo {
    /// Device model.
    #[serde(default)]
    pub model: String,
    /// Operating system.
    #[serde(default)]
    pub os_type: String,
    /// Application bundle id.
    #[serde(default)]
    pub app_id: String,
    /// Application version.
    #[serde(default)]
    pub app_version: String,
    /// `true` for the app's main process.
    #[serde(default)]
    pub is_main_process: bool,
    /// Per-install device id.
    #[serde(default)]
    pub device_uid: Option<String>,
}

fn default_connected() -> bool {
    true
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// WireSession
// ============================================================================

/// One session entry as sent by the device agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireSession {
    /// Session id.
    pub session_id: SessionId,

    /// Percent-encoded URL of the debuggable context.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub url: String,

    /// Context kind (`primary-runtime`, `web`, `worker`).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    /// Script engine, when the agent reports it.
    #[serde(default)]
    pub engine: Option<String>,

    /// Screenshot, when the agent reports one inline.
    #[serde(default)]
    pub screenshot: Option<String>,
}

// ============================================================================
// Parsing
// ============================================================================

/// Extracts the device roster from a `RoomClients` frame.
///
/// Malformed entries are logged and skipped.
///
/// # Errors
///
/// - [`Error::Protocol`] if the frame is not a device roster or its payload
///   is not a list
pub fn parse_device_roster(frame: &Envelope) -> Result<Vec<WireDevice>> {
    if frame.kind() != kind::ROOM_CLIENTS {
        return Err(Error::protocol(format!(
            "Expected {} frame, got {}",
            kind::ROOM_CLIENTS,
            frame.kind()
        )));
    }

    decode_entries(frame.data.clone(), "device")
}

/// Extracts the owning device and session list from a `ListSession` frame.
///
/// Malformed entries are logged and skipped.
///
/// # Errors
///
/// - [`Error::Protocol`] if the frame is not a session roster, names no
///   device or its message is not a list
pub fn parse_session_roster(frame: &Envelope) -> Result<(DeviceId, Vec<WireSession>)> {
    if frame.kind() != kind::LIST_SESSION {
        return Err(Error::protocol(format!(
            "Expected {} frame, got {}",
            kind::LIST_SESSION,
            frame.kind()
        )));
    }

    let device_id = frame
        .client_id()
        .ok_or_else(|| Error::protocol("Session roster without client_id"))?;

    let sessions = match frame.message() {
        Some(Value::Null) | None => Vec::new(),
        Some(message) => decode_entries(message, "session")?,
    };

    Ok((device_id, sessions))
}

/// Decodes a roster list entry by entry.
fn decode_entries<T: DeserializeOwned>(list: Value, entry: &str) -> Result<Vec<T>> {
    let items = match list {
        Value::Array(items) => items,
        other => return Err(Error::protocol(format!("Expected a {entry} list, got {other}"))),
    };

    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(entry, index, error = %e, "Skipping malformed roster entry");
                None
            }
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_device_roster() {
        let frame = Envelope::new(
            kind::ROOM_CLIENTS,
            json!([{ "id": 7, "info": { "appId": "a", "isMainProcess": true } }]),
        );

        let devices = parse_device_roster(&frame).expect("roster");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, Some(DeviceId::from(7)));
        assert!(devices[0].info.is_main_process);
        assert!(devices[0].connected);
        assert!(!devices[0].simulator);
    }

    #[test]
    fn test_parse_device_roster_rejects_wrong_kind() {
        let frame = Envelope::new("Other", json!([]));
        assert!(parse_device_roster(&frame).is_err());
    }

    #[test]
    fn test_parse_session_roster_inline_and_stringified() {
        let inline = Envelope::customized(
            kind::LIST_SESSION,
            &DeviceId::from(7),
            None,
            json!([{ "session_id": 2, "url": "http://x" }]),
        );
        let stringified = Envelope::customized(
            kind::LIST_SESSION,
            &DeviceId::from(7),
            None,
            json!(r#"[{"session_id":2,"url":"http://x","type":"worker"}]"#),
        );

        let (device, sessions) = parse_session_roster(&inline).expect("inline");
        assert_eq!(device, DeviceId::from(7));
        assert_eq!(sessions[0].session_id, SessionId::new(2));

        let (_, sessions) = parse_session_roster(&stringified).expect("stringified");
        assert_eq!(sessions[0].kind.as_deref(), Some("worker"));
    }

    #[test]
    fn test_bad_session_entry_does_not_drop_roster() {
        let frame = Envelope::customized(
            kind::LIST_SESSION,
            &DeviceId::from(7),
            None,
            json!([
                { "session_id": 1, "url": "http://ok" },
                { "session_id": 2, "url": null },
                { "session_id": "3", "url": "http://three" },
                { "session_id": "not-a-number" },
                { "url": "http://no-id" },
            ]),
        );

        let (_, sessions) = parse_session_roster(&frame).expect("roster");
        let ids: Vec<SessionId> = sessions.iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec![SessionId::new(1), SessionId::new(2), SessionId::new(3)]);
        assert_eq!(sessions[1].url, "");
    }

    #[test]
    fn test_bad_device_entry_does_not_drop_roster() {
        let frame = Envelope::new(
            kind::ROOM_CLIENTS,
            json!([
                { "id": 7, "info": { "appId": "a" } },
                { "id": 8, "info": "garbage" },
                { "id": 9, "connected": false },
            ]),
        );

        let devices = parse_device_roster(&frame).expect("roster");
        let ids: Vec<Option<DeviceId>> = devices.into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![Some(DeviceId::from(7)), Some(DeviceId::from(9))]);
    }

    #[test]
    fn test_roster_that_is_not_a_list_is_rejected() {
        let frame = Envelope::new(kind::ROOM_CLIENTS, json!({ "id": 7 }));
        assert!(matches!(parse_device_roster(&frame), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_parse_session_roster_empty_message() {
        let frame = Envelope::customized(kind::LIST_SESSION, &DeviceId::from(7), None, Value::Null);
        let (_, sessions) = parse_session_roster(&frame).expect("empty");
        assert!(sessions.is_empty());
    }
}
