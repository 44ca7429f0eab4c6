//! Request, response, event and bridge envelopes.
//!
//! Field names are part of the wire contract shared with existing peers
//! and must not change.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::CallId;

// ============================================================================
// EnvelopeType
// ============================================================================

/// Discriminator carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    /// Reply to a request.
    Response,
    /// Fire-and-forget notification.
    Event,
}

fn response_type() -> EnvelopeType {
    EnvelopeType::Response
}

fn event_type() -> EnvelopeType {
    EnvelopeType::Event
}

// ============================================================================
// RequestEnvelope
// ============================================================================

/// A call from a requester to a responder.
///
/// # Format
///
/// ```json
/// { "id": "3f2a...", "method": "math:add", "payload": { "a": 5, "b": 3 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id.
    pub id: CallId,

    /// Method name, conventionally `plugin:method`.
    pub method: String,

    /// Call arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl RequestEnvelope {
    /// Creates a request with a freshly generated id.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: CallId::generate(),
            method: method.into(),
            payload: payload.filter(|p| !p.is_null()),
        }
    }
}

// ============================================================================
// ResponseEnvelope
// ============================================================================

/// A reply from a responder.
///
/// Exactly one of `payload` and `error` is meaningful: when `error` is set
/// the call failed.
///
/// # Format
///
/// Success:
/// ```json
/// { "id": "3f2a...", "type": "response", "payload": 8 }
/// ```
///
/// Error:
/// ```json
/// { "id": "3f2a...", "type": "response", "error": "Method math:mul not found" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Matches the request `id`.
    pub id: CallId,

    /// Always `response`.
    #[serde(rename = "type", default = "response_type")]
    pub envelope_type: EnvelopeType,

    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Error message (if failure).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_error"
    )]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Creates a success response. A `null` result is sent without payload.
    #[inline]
    #[must_use]
    pub fn success(id: CallId, payload: Value) -> Self {
        Self {
            id,
            envelope_type: EnvelopeType::Response,
            payload: Some(payload).filter(|p| !p.is_null()),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(id: CallId, error: impl Into<String>) -> Self {
        Self {
            id,
            envelope_type: EnvelopeType::Response,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the payload, or the remote error attributed to `method`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the response carries an error.
    pub fn into_result(self, method: &str) -> Result<Value> {
        match self.error {
            Some(message) => Err(Error::remote(method, message)),
            None => Ok(self.payload.unwrap_or(Value::Null)),
        }
    }
}

/// Accepts any JSON value as `error`, stringifying non-strings.
fn deserialize_error<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ============================================================================
// EventEnvelope
// ============================================================================

/// A notification pushed from the responder to every requester.
///
/// # Format
///
/// ```json
/// { "type": "event", "method": "console:log", "payload": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Always `event`.
    #[serde(rename = "type", default = "event_type")]
    pub envelope_type: EnvelopeType,

    /// Event name.
    pub method: String,

    /// Event data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl EventEnvelope {
    /// Creates an event envelope.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            envelope_type: EnvelopeType::Event,
            method: method.into(),
            payload: payload.filter(|p| !p.is_null()),
        }
    }
}

// ============================================================================
// BridgeMessage
// ============================================================================

/// A message published through a namespaced bridge.
///
/// # Format
///
/// ```json
/// { "event": "ping", "data": { "n": 1 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
    /// Event name within the bridge namespace.
    pub event: String,

    /// Event data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BridgeMessage {
    /// Creates a bridge message.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event: event.into(),
            data: data.filter(|d| !d.is_null()),
        }
    }
}

// ============================================================================
// Codec helpers
// ============================================================================

/// Serializes an envelope into a transport value.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
#[inline]
pub fn encode<T: Serialize>(envelope: &T) -> Result<Value> {
    Ok(serde_json::to_value(envelope)?)
}

/// Decodes an inbound transport value, returning `None` when malformed.
#[inline]
pub fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = RequestEnvelope::new("math:add", Some(json!({ "a": 5, "b": 3 })));
        let value = encode(&request).expect("encode");

        assert_eq!(value["method"], "math:add");
        assert_eq!(value["payload"]["a"], 5);
        assert_eq!(value["id"], request.id.as_str());
    }

    #[test]
    fn test_request_without_payload_omits_field() {
        let request = RequestEnvelope::new("sys:getPlugins", None);
        let value = encode(&request).expect("encode");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_request_missing_method_is_malformed() {
        let decoded: Option<RequestEnvelope> = decode(json!({ "id": "x" }));
        assert!(decoded.is_none());
    }

    #[test]
    fn test_success_response() {
        let response = ResponseEnvelope::success(CallId::from_string("a"), json!(8));
        let value = encode(&response).expect("encode");

        assert_eq!(value, json!({ "id": "a", "type": "response", "payload": 8 }));
        assert_eq!(response.into_result("math:add").expect("ok"), json!(8));
    }

    #[test]
    fn test_null_result_has_no_payload() {
        let response = ResponseEnvelope::success(CallId::from_string("a"), Value::Null);
        let value = encode(&response).expect("encode");
        assert_eq!(value, json!({ "id": "a", "type": "response" }));
    }

    #[test]
    fn test_error_response() {
        let response = ResponseEnvelope::failure(CallId::from_string("a"), "boom");
        assert!(response.is_error());

        let err = response.into_result("error:throw").unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_error_field_accepts_non_string() {
        let response: ResponseEnvelope =
            decode(json!({ "id": "a", "type": "response", "error": { "code": 1 } }))
                .expect("decode");
        assert_eq!(response.error.as_deref(), Some(r#"{"code":1}"#));
    }

    #[test]
    fn test_response_type_defaults() {
        let response: ResponseEnvelope = decode(json!({ "id": "a", "payload": true })).expect("decode");
        assert_eq!(response.envelope_type, EnvelopeType::Response);
        assert!(!response.is_error());
    }

    #[test]
    fn test_event_serialization() {
        let event = EventEnvelope::new("test:event", Some(json!({ "message": "Hello" })));
        let value = encode(&event).expect("encode");
        assert_eq!(
            value,
            json!({ "type": "event", "method": "test:event", "payload": { "message": "Hello" } })
        );
    }

    #[test]
    fn test_bridge_message_format() {
        let message = BridgeMessage::new("ping", Some(json!({ "n": 1 })));
        let value = encode(&message).expect("encode");
        assert_eq!(value, json!({ "event": "ping", "data": { "n": 1 } }));
    }
}
