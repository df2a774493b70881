//! Broker transport abstraction.
//!
//! The RPC layers only rely on a small slice of broker behaviour:
//!
//! - point-to-point queues reached through the default exchange (routing key = queue name)
//! - manual acknowledgement with a per-consumer prefetch window
//! - server-named exclusive queues deleted when their owning connection closes
//! - silent drop of messages published to a queue that does not exist
//!
//! [`Broker`] and [`Connection`] capture that slice. [`memory::MemoryBroker`]
//! is the in-process implementation.

pub mod memory;

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

pub use memory::{MemoryBroker, GENERATED_QUEUE_PREFIX};

/// Maximum queue name length accepted by AMQP brokers.
pub const MAX_QUEUE_NAME_LEN: usize = 255;

/// Shared handle to a broker.
pub type BrokerPtr = Arc<dyn Broker>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures raised by a broker connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection is closed")]
    ConnectionClosed,
    #[error("queue '{queue}' not found")]
    QueueNotFound { queue: String },
    #[error("queue '{queue}' is exclusive to another connection")]
    ResourceLocked { queue: String },
    #[error("queue '{queue}' already declared with different options")]
    PreconditionFailed { queue: String },
    #[error("invalid queue name {name:?}: {reason}")]
    InvalidQueueName { name: String, reason: &'static str },
    #[error("unsupported broker endpoint: {endpoint}")]
    UnsupportedEndpoint { endpoint: String },
}

/// Validates a routable queue name.
///
/// # Errors
///
/// Returns `TransportError::InvalidQueueName` for empty, over-long, or
/// control-character names.
pub fn validate_queue_name(name: &str) -> Result<(), TransportError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.len() > MAX_QUEUE_NAME_LEN {
        "name exceeds 255 bytes"
    } else if name.chars().any(char::is_control) {
        "name contains control characters"
    } else {
        return Ok(());
    };
    Err(TransportError::InvalidQueueName {
        name: name.to_string(),
        reason,
    })
}

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// Broker message properties used for request/reply correlation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Queue the sender wants the answer delivered to.
    pub reply_to: Option<String>,
    /// Token the answer must carry.
    pub correlation_id: Option<String>,
}

impl MessageProperties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Options for queue declaration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    /// Owned by the declaring connection and deleted when it closes.
    pub exclusive: bool,
}

impl QueueOptions {
    /// Options for a call-scoped reply queue.
    #[must_use]
    pub fn exclusive() -> Self {
        Self {
            durable: false,
            exclusive: true,
        }
    }
}

/// Options for starting a consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Maximum unacknowledged deliveries in flight. `None` means unlimited.
    pub prefetch: Option<u16>,
    /// Deliveries count as acknowledged as soon as they are handed out.
    pub no_ack: bool,
}

impl ConsumeOptions {
    /// Manual acknowledgement with the given prefetch window.
    #[must_use]
    pub fn manual(prefetch: u16) -> Self {
        Self {
            prefetch: Some(prefetch),
            no_ack: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Confirms the delivery was processed.
    async fn ack(&self) -> Result<(), TransportError>;

    /// Refuses the delivery, optionally putting it back on the queue.
    async fn reject(&self, requeue: bool) -> Result<(), TransportError>;
}

/// A message handed to a consumer.
pub struct Delivery {
    pub delivery_tag: u64,
    /// Queue the message was consumed from.
    pub routing_key: String,
    /// Set when the message was handed out before and never acknowledged.
    pub redelivered: bool,
    pub properties: MessageProperties,
    pub body: Bytes,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    #[must_use]
    pub fn new(
        delivery_tag: u64,
        routing_key: String,
        redelivered: bool,
        properties: MessageProperties,
        body: Bytes,
        acker: Box<dyn Acknowledge>,
    ) -> Self {
        Self {
            delivery_tag,
            routing_key,
            redelivered,
            properties,
            body,
            acker,
        }
    }

    /// Acknowledges the delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the owning channel is gone.
    pub async fn ack(self) -> Result<(), TransportError> {
        self.acker.ack().await
    }

    /// Rejects the delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the owning channel is gone.
    pub async fn reject(self, requeue: bool) -> Result<(), TransportError> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Stream of deliveries from one queue.
///
/// Dropping the consumer cancels it; deliveries it never settled go back to
/// the queue.
#[derive(Debug)]
pub struct Consumer {
    queue: String,
    rx: mpsc::Receiver<Delivery>,
}

impl Consumer {
    #[must_use]
    pub fn new(queue: String, rx: mpsc::Receiver<Delivery>) -> Self {
        Self { queue, rx }
    }

    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Waits for the next delivery. Returns `None` once the consumer has been
    /// cancelled by the broker (connection closed or queue deleted).
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Broker / Connection traits
// ---------------------------------------------------------------------------

/// A single broker connection (AMQP connection + channel).
///
/// Exclusive queues declared through a connection live exactly as long as
/// the connection. Implementations must release them on `close()` and on
/// drop.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Declares a queue and returns its name. An empty `name` asks the broker
    /// to generate a unique one.
    async fn declare_queue(&self, name: &str, options: QueueOptions)
        -> Result<String, TransportError>;

    /// Publishes a message through the default exchange.
    async fn publish(
        &self,
        routing_key: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> Result<(), TransportError>;

    /// Starts consuming from a queue.
    async fn consume(&self, queue: &str, options: ConsumeOptions)
        -> Result<Consumer, TransportError>;

    /// Deletes a queue, dropping any ready messages.
    async fn delete_queue(&self, name: &str) -> Result<(), TransportError>;

    /// Closes the connection. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

/// Factory for broker connections.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Endpoint this broker was opened for.
    fn endpoint(&self) -> &str;
}

/// Scheme of the in-process broker endpoints.
pub const MEMORY_SCHEME: &str = "memory://";

fn memory_registry() -> &'static DashMap<String, MemoryBroker> {
    static REGISTRY: OnceLock<DashMap<String, MemoryBroker>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

/// Opens the broker selected by `endpoint`.
///
/// Only `memory://<name>` is supported. Every open of the same name within
/// one process returns a handle to the same [`MemoryBroker`], so its queues
/// are shared; different names are isolated. Nothing outside the process can
/// reach these brokers.
///
/// # Errors
///
/// Returns `TransportError::UnsupportedEndpoint` for any other endpoint,
/// including bare host names and `memory://` without a name.
pub fn open_broker(endpoint: &str) -> Result<BrokerPtr, TransportError> {
    match endpoint.strip_prefix(MEMORY_SCHEME) {
        Some(name) if !name.is_empty() => {
            let broker = memory_registry()
                .entry(endpoint.to_string())
                .or_insert_with(|| MemoryBroker::new(endpoint))
                .clone();
            Ok(Arc::new(broker))
        }
        _ => Err(TransportError::UnsupportedEndpoint {
            endpoint: endpoint.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_validation() {
        assert!(validate_queue_name("service.catalog").is_ok());
        assert!(matches!(
            validate_queue_name(""),
            Err(TransportError::InvalidQueueName { reason: "name is empty", .. })
        ));
        assert!(validate_queue_name(&"q".repeat(256)).is_err());
        assert!(validate_queue_name("bad\nname").is_err());
    }

    #[test]
    fn properties_builder() {
        let props = MessageProperties::new()
            .with_reply_to("amq.gen-1")
            .with_correlation_id("abc");
        assert_eq!(props.reply_to.as_deref(), Some("amq.gen-1"));
        assert_eq!(props.correlation_id.as_deref(), Some("abc"));
    }

    #[test]
    fn open_broker_selects_memory() {
        assert_eq!(
            open_broker("memory://selects").unwrap().endpoint(),
            "memory://selects"
        );
    }

    #[test]
    fn open_broker_rejects_non_memory_endpoints() {
        for endpoint in [
            "localhost",
            "rabbitmq.prod.internal",
            "amqp://guest@localhost:5672",
            "memory://",
            "",
        ] {
            let err = open_broker(endpoint).err().unwrap();
            assert_eq!(
                err,
                TransportError::UnsupportedEndpoint {
                    endpoint: endpoint.to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn same_name_shares_queues_across_opens() {
        let first = open_broker("memory://shared-registry").unwrap();
        let second = open_broker("memory://shared-registry").unwrap();
        let other = open_broker("memory://isolated-registry").unwrap();

        let declaring = first.connect().await.unwrap();
        declaring
            .declare_queue("shared", QueueOptions::default())
            .await
            .unwrap();
        declaring
            .publish("shared", MessageProperties::new(), Bytes::from_static(b"hi"))
            .await
            .unwrap();

        let reading = second.connect().await.unwrap();
        let mut consumer = reading
            .consume("shared", ConsumeOptions::manual(1))
            .await
            .unwrap();
        let delivery = consumer.recv().await.unwrap();
        assert_eq!(delivery.body, Bytes::from_static(b"hi"));
        delivery.ack().await.unwrap();

        let outsider = other.connect().await.unwrap();
        assert!(matches!(
            outsider.consume("shared", ConsumeOptions::manual(1)).await,
            Err(TransportError::QueueNotFound { .. })
        ));
    }
}
