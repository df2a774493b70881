//! Top-level caller for the RPC gateway.

use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::debug;

use crate::call::{CallError, RpcCaller};
use crate::envelope::{decode_reply, encode, CallEnvelope, Params, ERROR_KEY};
use crate::transport::BrokerPtr;

/// Well-known name of the inbound gateway queue.
pub const DEFAULT_GATEWAY_QUEUE: &str = "rpc_gateway";

/// How long a caller waits for the gateway before giving up.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Reply synthesized when the gateway does not answer in time.
pub const CALLER_TIMEOUT_MESSAGE: &str = "timeout waiting for response";

/// Sends `service.action` calls to the gateway queue.
///
/// [`call`](Self::call) never fails: every outcome is folded into a JSON
/// value, with failures reported under the `"error"` key.
#[derive(Clone)]
pub struct GatewayClient {
    caller: RpcCaller,
    gateway_queue: String,
    timeout: Duration,
}

impl GatewayClient {
    #[must_use]
    pub fn new(broker: BrokerPtr) -> Self {
        Self {
            caller: RpcCaller::new(broker),
            gateway_queue: DEFAULT_GATEWAY_QUEUE.to_string(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_gateway_queue(mut self, gateway_queue: impl Into<String>) -> Self {
        self.gateway_queue = gateway_queue.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls `service.action` and returns the decoded reply.
    ///
    /// - a JSON reply is returned as is
    /// - a non-JSON reply becomes `{"raw": <text>}`
    /// - a timeout becomes `{"error": "timeout waiting for response"}`
    /// - any other failure becomes `{"error": <message>}`
    pub async fn call(&self, service: &str, action: &str, params: Params) -> Value {
        let envelope = CallEnvelope::new(service, action, params);
        debug!(service, action, "calling gateway");
        match self.try_call(&envelope).await {
            Ok(body) => decode_reply(&body),
            Err(CallError::Timeout { .. }) => json!({ ERROR_KEY: CALLER_TIMEOUT_MESSAGE }),
            Err(err) => json!({ ERROR_KEY: err.to_string() }),
        }
    }

    /// Sends a prepared envelope and returns the raw reply body.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`CallError`] unchanged.
    pub async fn try_call(&self, envelope: &CallEnvelope) -> Result<Bytes, CallError> {
        let body = encode(envelope)?;
        self.caller.call(&self.gateway_queue, body, self.timeout).await
    }
}
