//! Action request/response types shared by every backend service.

use serde_json::{json, Value};

use mqrpc_core::{Params, ServiceEnvelope, ERROR_KEY};

/// Queue names of the bundled backend services.
pub mod service_names {
    pub const CATALOG: &str = "catalog";
    pub const PLAYLIST: &str = "playlist";
    pub const USERS: &str = "users";
    pub const MEDIA: &str = "media";
}

/// A decoded request for one backend action.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Service that received the request (used for instrumentation).
    pub service_name: &'static str,
    pub action: String,
    pub params: Params,
    /// Token of the broker message that carried the request.
    pub correlation_id: Option<String>,
}

impl ActionRequest {
    #[must_use]
    pub fn new(service_name: &'static str, envelope: ServiceEnvelope) -> Self {
        Self {
            service_name,
            action: envelope.action,
            params: envelope.params,
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Returns a string parameter, treating empty strings as absent.
    #[must_use]
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Returns a required string parameter.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::InvalidParams` naming the missing field.
    pub fn required_str(&self, key: &str) -> Result<&str, ActionError> {
        self.str_param(key)
            .ok_or_else(|| ActionError::InvalidParams(format!("{key} is required")))
    }

    /// Returns a non-negative integer parameter or `default`.
    #[must_use]
    pub fn limit_param(&self, key: &str, default: usize) -> usize {
        self.params
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(default)
    }
}

/// Successful action result: a JSON object sent back verbatim.
pub type ActionResponse = Value;

/// Errors returned by action handlers. Each becomes an `{"error": ...}` reply.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("action '{action}' not recognized")]
    UnknownAction { action: String },
    #[error("{0}")]
    InvalidParams(String),
    #[error("{0}")]
    NotFound(String),
    #[error("action timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ActionError {
    /// Short label used as the `outcome` of an action span.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownAction { .. } => "unknown_action",
            Self::InvalidParams(_) => "invalid_params",
            Self::NotFound(_) => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Renders the error as a reply body value.
    #[must_use]
    pub fn to_reply(&self) -> Value {
        json!({ ERROR_KEY: self.to_string() })
    }
}
