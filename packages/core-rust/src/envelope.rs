//! Wire envelopes carried in message bodies.
//!
//! Two request shapes travel over the broker:
//!
//! - [`CallEnvelope`]: caller -> gateway, `{"service", "action", "params"}`
//! - [`ServiceEnvelope`]: gateway -> backend, `{"action", "params"}`
//!
//! Replies are arbitrary JSON objects. The only reserved convention is the
//! [`ERROR_KEY`] field signalling failure.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Reserved reply field that marks a failed call.
pub const ERROR_KEY: &str = "error";

/// Free-form call parameters.
pub type Params = Map<String, Value>;

/// Errors raised while encoding or decoding an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// CallEnvelope
// ---------------------------------------------------------------------------

/// Outer envelope sent by callers to the gateway queue.
///
/// `service` selects the backend queue. `action` and `params` are opaque to
/// the gateway and forwarded unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub action: String,
    #[serde(default)]
    pub params: Params,
}

impl CallEnvelope {
    #[must_use]
    pub fn new(service: impl Into<String>, action: impl Into<String>, params: Params) -> Self {
        Self {
            service: Some(service.into()),
            action: action.into(),
            params,
        }
    }

    /// Returns the target service name, treating an empty string as missing.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.service.as_deref().filter(|name| !name.is_empty())
    }

    /// Strips the service name, yielding the envelope the backend receives.
    #[must_use]
    pub fn into_service_envelope(self) -> ServiceEnvelope {
        ServiceEnvelope {
            action: self.action,
            params: self.params,
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceEnvelope
// ---------------------------------------------------------------------------

/// Inner envelope sent by the gateway to a backend queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEnvelope {
    pub action: String,
    #[serde(default)]
    pub params: Params,
}

// ---------------------------------------------------------------------------
// Codec helpers
// ---------------------------------------------------------------------------

/// Serializes an envelope into a message body.
///
/// # Errors
///
/// Returns `EnvelopeError::Malformed` if the value cannot be represented as JSON.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, EnvelopeError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Deserializes a message body into an envelope.
///
/// # Errors
///
/// Returns `EnvelopeError::Malformed` if the body is not valid JSON or lacks
/// a required field.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, EnvelopeError> {
    Ok(serde_json::from_slice(body)?)
}

/// Builds an `{"error": <message>}` reply body.
#[must_use]
pub fn error_reply(message: impl std::fmt::Display) -> Bytes {
    let value = json!({ ERROR_KEY: message.to_string() });
    Bytes::from(value.to_string())
}

/// Interprets a reply body for display to a caller.
///
/// Valid JSON is returned as is; anything else is wrapped as
/// `{"raw": <lossy utf-8 text>}`.
#[must_use]
pub fn decode_reply(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(body) }))
}

/// Returns the error message of a reply, if it carries one.
#[must_use]
pub fn reply_error(reply: &Value) -> Option<&str> {
    reply.get(ERROR_KEY).and_then(Value::as_str)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
