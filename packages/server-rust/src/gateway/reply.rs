//! Reply routing for calls accepted by the gateway.

use bytes::Bytes;
use tracing::warn;

use mqrpc_core::{BrokerPtr, Connection, MessageProperties, TransportError};

/// Where and how to answer one caller: its `reply_to` queue and the
/// `correlation_id` the answer must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRoute {
    pub reply_to: String,
    pub correlation_id: Option<String>,
}

impl ReplyRoute {
    /// Extracts the route from request properties. `None` when the request
    /// has no `reply_to`, in which case nobody can be answered.
    #[must_use]
    pub fn from_properties(properties: &MessageProperties) -> Option<Self> {
        let reply_to = properties.reply_to.clone().filter(|q| !q.is_empty())?;
        Some(Self {
            reply_to,
            correlation_id: properties.correlation_id.clone(),
        })
    }

    fn properties(&self) -> MessageProperties {
        MessageProperties {
            reply_to: None,
            correlation_id: self.correlation_id.clone(),
        }
    }

    /// Publishes `body` to the caller over an existing connection.
    ///
    /// # Errors
    ///
    /// Returns the broker error if the publish fails.
    pub async fn publish(&self, connection: &dyn Connection, body: Bytes) -> Result<(), TransportError> {
        connection
            .publish(&self.reply_to, self.properties(), body)
            .await
    }

    /// Publishes `body` to the caller over a fresh connection, closed
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns the broker error if connecting or publishing fails.
    pub async fn publish_fresh(&self, broker: &BrokerPtr, body: Bytes) -> Result<(), TransportError> {
        let connection = broker.connect().await?;
        let result = self.publish(connection.as_ref(), body).await;
        if let Err(err) = connection.close().await {
            warn!(error = %err, "failed to close reply connection");
        }
        result
    }

    /// Like [`publish`](Self::publish), but logs failures instead of
    /// returning them.
    pub async fn publish_best_effort(&self, connection: &dyn Connection, body: Bytes) {
        if let Err(err) = self.publish(connection, body).await {
            warn!(
                reply_to = %self.reply_to,
                correlation_id = ?self.correlation_id,
                error = %err,
                "failed to publish reply"
            );
        }
    }
}
