//! Second hop of a gateway call.
//!
//! A forwarding task owns one accepted call. It relays the inner envelope to
//! the backend queue through the correlated call primitive and publishes
//! exactly one answer to the original caller: the backend reply byte for
//! byte, or an `{"error": ...}` body.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use mqrpc_core::envelope::{encode, error_reply};
use mqrpc_core::{CallError, RpcCaller, ServiceEnvelope};

use super::reply::ReplyRoute;

/// Body of the reply sent when the backend misses the hop deadline.
#[must_use]
pub fn backend_timeout_message(service: &str) -> String {
    format!("service '{service}' did not respond (timeout)")
}

#[derive(Debug)]
pub struct ForwardingTask {
    service: String,
    destination: String,
    envelope: ServiceEnvelope,
    route: ReplyRoute,
    hop_timeout: Duration,
}

impl ForwardingTask {
    #[must_use]
    pub fn new(
        service: String,
        destination: String,
        envelope: ServiceEnvelope,
        route: ReplyRoute,
        hop_timeout: Duration,
    ) -> Self {
        Self {
            service,
            destination,
            envelope,
            route,
            hop_timeout,
        }
    }

    /// Runs the hop and publishes the outcome on a fresh connection.
    /// Failures are logged, never returned.
    pub async fn run(self, caller: RpcCaller) {
        let body = self.exchange(&caller).await;
        if let Err(err) = self.route.publish_fresh(caller.broker(), body).await {
            warn!(
                service = %self.service,
                reply_to = %self.route.reply_to,
                error = %err,
                "failed to deliver reply to caller"
            );
        }
    }

    async fn exchange(&self, caller: &RpcCaller) -> Bytes {
        let body = match encode(&self.envelope) {
            Ok(body) => body,
            Err(err) => return error_reply(err),
        };

        match caller.call(&self.destination, body, self.hop_timeout).await {
            Ok(reply) => {
                debug!(service = %self.service, action = %self.envelope.action, "backend replied");
                reply
            }
            Err(CallError::Timeout { .. }) => {
                warn!(
                    service = %self.service,
                    action = %self.envelope.action,
                    timeout_ms = u64::try_from(self.hop_timeout.as_millis()).unwrap_or(u64::MAX),
                    "backend did not respond"
                );
                error_reply(backend_timeout_message(&self.service))
            }
            Err(err) => {
                warn!(service = %self.service, error = %err, "forwarding failed");
                error_reply(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::*;
    use mqrpc_core::{Broker, ConsumeOptions, Consumer, MemoryBroker, Params, QueueOptions};

    async fn reply_queue(broker: &MemoryBroker) -> (Box<dyn mqrpc_core::Connection>, Consumer, String) {
        let conn = broker.connect().await.unwrap();
        let queue = conn.declare_queue("", QueueOptions::exclusive()).await.unwrap();
        let consumer = conn.consume(&queue, ConsumeOptions::manual(1)).await.unwrap();
        (conn, consumer, queue)
    }

    fn task(service: &str, destination: &str, reply_to: String, hop: Duration) -> ForwardingTask {
        ForwardingTask::new(
            service.to_string(),
            destination.to_string(),
            ServiceEnvelope {
                action: "search".to_string(),
                params: Params::new(),
            },
            ReplyRoute {
                reply_to,
                correlation_id: Some("caller-token".to_string()),
            },
            hop,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn silent_backend_yields_timeout_reply() {
        let broker = MemoryBroker::default();
        let (_conn, mut consumer, queue) = reply_queue(&broker).await;
        let caller = RpcCaller::new(Arc::new(broker.clone()));

        task("ghost", "service.ghost", queue, Duration::from_secs(15))
            .run(caller)
            .await;

        let delivery = consumer.recv().await.unwrap();
        assert_eq!(delivery.properties.correlation_id.as_deref(), Some("caller-token"));
        let body: Value = serde_json::from_slice(&delivery.body).unwrap();
        assert_eq!(body, json!({"error": "service 'ghost' did not respond (timeout)"}));
    }

    #[tokio::test]
    async fn invalid_destination_yields_error_reply() {
        let broker = MemoryBroker::default();
        let (_conn, mut consumer, queue) = reply_queue(&broker).await;
        let caller = RpcCaller::new(Arc::new(broker.clone()));

        task("bad\nname", "service.bad\nname", queue, Duration::from_secs(1))
            .run(caller)
            .await;

        let delivery = consumer.recv().await.unwrap();
        let body: Value = serde_json::from_slice(&delivery.body).unwrap();
        let message = body["error"].as_str().unwrap();
        assert!(message.starts_with("invalid destination"));
    }
}
