//! Correlated call primitive.
//!
//! One call = one connection, one exclusive reply queue, one correlation
//! token. The request is published with `{reply_to, correlation_id}` and the
//! caller waits until a reply carrying the same token arrives or the deadline
//! passes. The connection is released on every exit path, which deletes the
//! reply queue with it.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::correlation::CorrelationId;
use crate::envelope::EnvelopeError;
use crate::transport::{
    validate_queue_name, BrokerPtr, ConsumeOptions, Consumer, Connection, MessageProperties,
    QueueOptions, TransportError,
};

/// Errors returned by [`RpcCaller::call`].
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("no reply within {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },
    #[error("invalid destination: {0}")]
    InvalidDestination(TransportError),
    #[error("call timeout must be greater than zero")]
    InvalidTimeout,
    #[error("reply queue was cancelled before a reply arrived")]
    ReplyQueueCancelled,
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CallError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// ---------------------------------------------------------------------------
// PendingCall
// ---------------------------------------------------------------------------

/// Book-keeping for one outstanding call. Lives only inside `call()`.
#[derive(Debug)]
struct PendingCall {
    token: CorrelationId,
    deadline: Instant,
    reply_queue: String,
}

impl PendingCall {
    /// Receives until a delivery carrying this call's token shows up.
    async fn await_reply(&self, consumer: &mut Consumer) -> Result<Bytes, CallError> {
        loop {
            let Some(delivery) = consumer.recv().await else {
                return Err(CallError::ReplyQueueCancelled);
            };

            let matched = self
                .token
                .matches(delivery.properties.correlation_id.as_deref());
            if !matched {
                // The reply queue is exclusive to this call, so this is a
                // protocol violation by whoever published it.
                debug!(
                    reply_queue = %self.reply_queue,
                    received = ?delivery.properties.correlation_id,
                    "discarding reply with foreign correlation id"
                );
            }

            let body = delivery.body.clone();
            if let Err(err) = delivery.ack().await {
                debug!(error = %err, "reply ack failed");
            }
            if matched {
                return Ok(body);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RpcCaller
// ---------------------------------------------------------------------------

/// Issues correlated request/reply calls against broker queues.
///
/// Cheap to clone. Used both by external callers (against the gateway queue)
/// and by the gateway itself (against backend queues).
#[derive(Clone)]
pub struct RpcCaller {
    broker: BrokerPtr,
}

impl RpcCaller {
    #[must_use]
    pub fn new(broker: BrokerPtr) -> Self {
        Self { broker }
    }

    #[must_use]
    pub fn broker(&self) -> &BrokerPtr {
        &self.broker
    }

    /// Publishes `body` to `destination` and waits up to `timeout` for the
    /// correlated reply.
    ///
    /// # Errors
    ///
    /// - `CallError::InvalidDestination` / `CallError::InvalidTimeout` when the
    ///   preconditions fail (checked before any connection is opened)
    /// - `CallError::Timeout` when no matching reply arrives in time
    /// - `CallError::Transport` when the broker refuses an operation
    pub async fn call(
        &self,
        destination: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, CallError> {
        validate_queue_name(destination).map_err(CallError::InvalidDestination)?;
        if timeout.is_zero() {
            return Err(CallError::InvalidTimeout);
        }

        let deadline = Instant::now() + timeout;
        let connection = self.broker.connect().await?;

        let result = exchange(connection.as_ref(), destination, body, deadline, timeout).await;

        // Dropping the connection releases it as well; closing explicitly
        // keeps the release ordered before the result is returned.
        if let Err(err) = connection.close().await {
            warn!(error = %err, destination, "failed to close call connection");
        }
        result
    }
}

async fn exchange(
    connection: &dyn Connection,
    destination: &str,
    body: Bytes,
    deadline: Instant,
    timeout: Duration,
) -> Result<Bytes, CallError> {
    let reply_queue = connection
        .declare_queue("", QueueOptions::exclusive())
        .await?;
    // Consume before publishing so the reply cannot race the subscription.
    let mut consumer = connection
        .consume(&reply_queue, ConsumeOptions::manual(1))
        .await?;

    let pending = PendingCall {
        token: CorrelationId::generate(),
        deadline,
        reply_queue,
    };

    let properties = MessageProperties::new()
        .with_reply_to(pending.reply_queue.clone())
        .with_correlation_id(pending.token.as_str());
    connection.publish(destination, properties, body).await?;
    debug!(destination, correlation_id = %pending.token, "request published");

    match tokio::time::timeout_at(pending.deadline, pending.await_reply(&mut consumer)).await {
        Ok(result) => result,
        Err(_elapsed) => {
            debug!(destination, correlation_id = %pending.token, "call timed out");
            Err(CallError::Timeout { timeout })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::transport::{Broker, MemoryBroker, GENERATED_QUEUE_PREFIX};

    /// Replies to every request on `queue` with `reply`, using the request's token.
    async fn spawn_echo(broker: &MemoryBroker, queue: &str, reply: &'static str) {
        let conn = broker.connect().await.unwrap();
        conn.declare_queue(queue, QueueOptions::default()).await.unwrap();
        let mut consumer = conn.consume(queue, ConsumeOptions::manual(1)).await.unwrap();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.recv().await {
                let props = MessageProperties {
                    reply_to: None,
                    correlation_id: delivery.properties.correlation_id.clone(),
                };
                let reply_to = delivery.properties.reply_to.clone().unwrap();
                conn.publish(&reply_to, props, Bytes::from_static(reply.as_bytes()))
                    .await
                    .unwrap();
                delivery.ack().await.unwrap();
            }
        });
    }

    fn reply_queues(broker: &MemoryBroker) -> usize {
        broker
            .queue_names()
            .iter()
            .filter(|name| name.starts_with(GENERATED_QUEUE_PREFIX))
            .count()
    }

    #[tokio::test]
    async fn returns_correlated_reply() {
        let broker = MemoryBroker::default();
        spawn_echo(&broker, "service.echo", r#"{"ok":true}"#).await;

        let caller = RpcCaller::new(Arc::new(broker.clone()));
        let reply = caller
            .call("service.echo", Bytes::from_static(b"{}"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply, Bytes::from_static(br#"{"ok":true}"#));
        assert_eq!(reply_queues(&broker), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_consumer_and_releases_queue() {
        let broker = MemoryBroker::default();
        let caller = RpcCaller::new(Arc::new(broker.clone()));

        let started = Instant::now();
        let err = caller
            .call("service.silent", Bytes::from_static(b"{}"), Duration::from_secs(15))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert!(started.elapsed() < Duration::from_secs(16));
        assert_eq!(reply_queues(&broker), 0);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_foreign_token_and_keeps_waiting() {
        let broker = MemoryBroker::default();
        let conn = broker.connect().await.unwrap();
        conn.declare_queue("service.confused", QueueOptions::default())
            .await
            .unwrap();
        let mut consumer = conn
            .consume("service.confused", ConsumeOptions::manual(1))
            .await
            .unwrap();

        tokio::spawn(async move {
            let delivery = consumer.recv().await.unwrap();
            let reply_to = delivery.properties.reply_to.clone().unwrap();
            let wrong = MessageProperties::new().with_correlation_id("someone-else");
            conn.publish(&reply_to, wrong, Bytes::from_static(b"stale"))
                .await
                .unwrap();
            let right = MessageProperties {
                reply_to: None,
                correlation_id: delivery.properties.correlation_id.clone(),
            };
            conn.publish(&reply_to, right, Bytes::from_static(b"fresh"))
                .await
                .unwrap();
            delivery.ack().await.unwrap();
            // Keep the connection (and queue) alive until the test ends.
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let caller = RpcCaller::new(Arc::new(broker));
        let reply = caller
            .call("service.confused", Bytes::from_static(b"{}"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply, Bytes::from_static(b"fresh"));
    }

    #[tokio::test]
    async fn rejects_invalid_preconditions() {
        let broker = MemoryBroker::default();
        let caller = RpcCaller::new(Arc::new(broker.clone()));

        let err = caller
            .call("", Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidDestination(_)));

        let err = caller
            .call("service.x", Bytes::new(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidTimeout));
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn concurrent_calls_receive_their_own_replies() {
        let broker = MemoryBroker::default();
        let conn = broker.connect().await.unwrap();
        conn.declare_queue("service.mirror", QueueOptions::default())
            .await
            .unwrap();
        let mut consumer = conn
            .consume("service.mirror", ConsumeOptions::default())
            .await
            .unwrap();

        // Collect both requests first, then answer in reverse order with the
        // request body so each caller can check it got its own answer.
        tokio::spawn(async move {
            let first = consumer.recv().await.unwrap();
            let second = consumer.recv().await.unwrap();
            for delivery in [second, first] {
                let reply_to = delivery.properties.reply_to.clone().unwrap();
                let props = MessageProperties {
                    reply_to: None,
                    correlation_id: delivery.properties.correlation_id.clone(),
                };
                conn.publish(&reply_to, props, delivery.body.clone())
                    .await
                    .unwrap();
                delivery.ack().await.unwrap();
            }
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let caller = RpcCaller::new(Arc::new(broker.clone()));
        let (a, b) = tokio::join!(
            caller.call("service.mirror", Bytes::from_static(b"a"), Duration::from_secs(5)),
            caller.call("service.mirror", Bytes::from_static(b"b"), Duration::from_secs(5)),
        );
        assert_eq!(a.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(b.unwrap(), Bytes::from_static(b"b"));
        assert_eq!(reply_queues(&broker), 0);
    }
}
