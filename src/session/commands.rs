//! Typed requests on top of the correlation engine.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{DeviceId, SessionId};
use crate::protocol::{Envelope, kind, matcher};

use super::DebugSession;

// ============================================================================
// Constants
// ============================================================================

/// CDP method used for screenshot requests.
pub const SCREENSHOT_METHOD: &str = "Page.captureScreenshot";

// ============================================================================
// DebugSession - Commands
// ============================================================================

impl DebugSession {
    /// Sends a CDP command to one session and returns its `result`.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if the agent does not answer in time
    /// - [`Error::Protocol`] if the agent answers with a CDP `error`
    pub async fn send_cdp(
        &self,
        client_id: &DeviceId,
        session_id: SessionId,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let reply = self
            .send_correlated(
                |request_id| {
                    let message = json!({ "id": request_id, "method": method, "params": params });
                    (
                        Envelope::customized(
                            kind::CDP,
                            client_id,
                            Some(session_id),
                            Value::String(message.to_string()),
                        ),
                        matcher::cdp_reply(client_id.clone(), request_id),
                    )
                },
                self.default_timeout(),
            )
            .await?;

        let message = reply.message().unwrap_or(Value::Null);
        if let Some(error) = message.get("error") {
            return Err(Error::protocol(format!("{method} failed: {error}")));
        }

        Ok(message.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Queries the device's global debug switch.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if the device does not answer in time
    /// - [`Error::MalformedPayload`] if the answer is not a boolean
    pub async fn get_global_switch(&self, client_id: &DeviceId, timeout: Duration) -> Result<bool> {
        let reply = self
            .send_correlated(
                |_| {
                    (
                        Envelope::customized(kind::GET_GLOBAL_SWITCH, client_id, None, json!("")),
                        matcher::type_and_client(kind::GET_GLOBAL_SWITCH, client_id.clone()),
                    )
                },
                timeout,
            )
            .await?;

        parse_switch(&reply)
    }

    /// Updates the device's global debug switch and returns the new value.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if the device does not answer in time
    /// - [`Error::MalformedPayload`] if the answer is not a boolean
    pub async fn set_global_switch(&self, client_id: &DeviceId, enabled: bool) -> Result<bool> {
        debug!(%client_id, enabled, "Setting global switch");

        let reply = self
            .send_correlated(
                |_| {
                    (
                        Envelope::customized(
                            kind::SET_GLOBAL_SWITCH,
                            client_id,
                            None,
                            json!({ "global_value": enabled }),
                        ),
                        matcher::type_and_client(kind::SET_GLOBAL_SWITCH, client_id.clone()),
                    )
                },
                self.default_timeout(),
            )
            .await?;

        parse_switch(&reply)
    }

    /// Requests a screenshot of one session.
    ///
    /// Returns the base64 image data as sent by the agent.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if the agent does not answer in time
    /// - [`Error::MalformedPayload`] if the answer carries no image data
    pub async fn request_screenshot(
        &self,
        client_id: &DeviceId,
        session_id: SessionId,
        timeout: Duration,
    ) -> Result<String> {
        let reply = self
            .send_correlated(
                |request_id| {
                    (
                        Envelope::customized(
                            kind::SCREENSHOT,
                            client_id,
                            Some(session_id),
                            json!({ "id": request_id, "method": SCREENSHOT_METHOD, "params": { "format": "jpeg" } }),
                        ),
                        matcher::method_and_session(
                            kind::SCREENSHOT,
                            client_id.clone(),
                            session_id,
                            SCREENSHOT_METHOD,
                        ),
                    )
                },
                timeout,
            )
            .await?;

        let message = reply.message().unwrap_or(Value::Null);
        message
            .get("data")
            .or_else(|| message.pointer("/result/data"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::malformed_payload("message.data", "Screenshot reply without image data"))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Reads a switch value from `message` (`true`, `"true"` or
/// `{"global_value": true}`).
fn parse_switch(reply: &Envelope) -> Result<bool> {
    let message = reply.message().unwrap_or(Value::Null);
    let value = match &message {
        Value::Object(map) => map.get("global_value").unwrap_or(&Value::Null),
        other => other,
    };

    match value {
        Value::Bool(enabled) => Ok(*enabled),
        Value::String(text) if text == "true" => Ok(true),
        Value::String(text) if text == "false" => Ok(false),
        other => Err(Error::malformed_payload(
            "message",
            format!("Expected switch value, got {other}"),
        )),
    }
}

// ============================================================================
// Tests
// ============================================================================
