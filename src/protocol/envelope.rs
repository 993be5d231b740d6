//! Wire envelope shared by requests, replies and router notifications.
//!
//! # Format
//!
//! ```json
//! {
//!   "event": "Customized",
//!   "data": {
//!     "type": "CDP",
//!     "data": { "client_id": 7, "session_id": 2, "message": "{\"id\":1,...}" }
//!   }
//! }
//! ```
//!
//! Router notifications that are not `Customized` carry their payload
//! directly in `data` (for example the device roster under `RoomClients`).

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, from_str, json, to_string};

use crate::error::Result;
use crate::identifiers::{DeviceId, SessionId};

// ============================================================================
// Message Kinds
// ============================================================================

/// Well-known values of `event` and of `data.type`.
pub mod kind {
    /// Envelope event carrying a typed channel payload.
    pub const CUSTOMIZED: &str = "Customized";
    /// Device roster pushed by the router.
    pub const ROOM_CLIENTS: &str = "RoomClients";
    /// Chrome DevTools Protocol traffic, correlated by `message.id`.
    pub const CDP: &str = "CDP";
    /// Session roster of one device.
    pub const LIST_SESSION: &str = "ListSession";
    /// Query of the device's global debug switch.
    pub const GET_GLOBAL_SWITCH: &str = "GetGlobalSwitch";
    /// Update of the device's global debug switch.
    pub const SET_GLOBAL_SWITCH: &str = "SetGlobalSwitch";
    /// Screenshot request/reply, correlated by method and session.
    pub const SCREENSHOT: &str = "Screenshot";
}

// ============================================================================
// Envelope
// ============================================================================

/// A single frame exchanged with the debug router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Top-level event name.
    pub event: String,

    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

// ============================================================================
// Envelope - Constructors
// ============================================================================

impl Envelope {
    /// Creates an envelope with an arbitrary payload.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Creates a `Customized` envelope addressed to a device and session.
    #[must_use]
    pub fn customized(
        message_type: &str,
        client_id: &DeviceId,
        session_id: Option<SessionId>,
        message: Value,
    ) -> Self {
        let mut channel = Map::new();
        channel.insert("client_id".into(), json!(client_id));
        if let Some(session_id) = session_id {
            channel.insert("session_id".into(), json!(session_id));
        }
        channel.insert("message".into(), message);

        Self::new(
            kind::CUSTOMIZED,
            json!({ "type": message_type, "data": Value::Object(channel) }),
        )
    }

    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the text is not an envelope.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(from_str(text)?)
    }

    /// Serializes the envelope into a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(to_string(self)?)
    }
}

// ============================================================================
// Envelope - Accessors
// ============================================================================

impl Envelope {
    /// Returns the dispatch kind of this frame.
    ///
    /// For `Customized` frames this is the nested `type`, otherwise the
    /// top-level event name.
    #[must_use]
    pub fn kind(&self) -> &str {
        if self.event == kind::CUSTOMIZED
            && let Some(message_type) = self.data.get("type").and_then(Value::as_str)
        {
            return message_type;
        }
        &self.event
    }

    /// Returns `true` for `Customized` frames.
    #[inline]
    #[must_use]
    pub fn is_customized(&self) -> bool {
        self.event == kind::CUSTOMIZED
    }

    /// Returns the nested channel payload of a `Customized` frame.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> Option<&Value> {
        self.data.get("data")
    }

    /// Returns the device the frame belongs to.
    #[must_use]
    pub fn client_id(&self) -> Option<DeviceId> {
        let raw = self.channel()?.get("client_id")?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// Returns the session the frame belongs to.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        let raw = self.channel()?.get("session_id")?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// Returns the channel message.
    ///
    /// Agents send the message either as a JSON object or as a JSON string;
    /// strings holding JSON are decoded, anything else is returned as is.
    #[must_use]
    pub fn message(&self) -> Option<Value> {
        let raw = self.channel()?.get("message")?;
        match raw {
            Value::String(text) => Some(from_str(text).unwrap_or_else(|_| raw.clone())),
            other => Some(other.clone()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
