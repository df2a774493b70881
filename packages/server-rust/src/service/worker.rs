//! Queue consumer that drives one backend service.
//!
//! A `ServiceWorker` consumes `service.<name>` with manual acknowledgement and
//! handles one delivery at a time: decode the inner envelope, run the action
//! pipeline, publish the reply to `reply_to` with the request's
//! `correlation_id`, then acknowledge. A request whose reply cannot be
//! published is requeued rather than acknowledged.

use std::future::Future;

use bytes::Bytes;
use serde_json::Value;
use tower::{Service, ServiceExt};
use tracing::{debug, info, warn};

use mqrpc_core::envelope::{decode, encode, error_reply};
use mqrpc_core::{
    BrokerPtr, ConsumeOptions, Consumer, Connection, Delivery, MessageProperties, QueueOptions,
    ServiceEnvelope, TransportError,
};

use super::action::ActionRequest;
use super::config::WorkerConfig;
use super::middleware::ActionPipeline;

/// Errors that stop a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker '{service}' is not started")]
    NotStarted { service: &'static str },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Consumer loop for a single backend service queue.
///
/// Follows the deferred startup pattern: `new()` allocates, `start()` opens
/// the connection and begins consuming, `serve()` processes deliveries until
/// the shutdown future resolves or the consumer is cancelled.
pub struct ServiceWorker {
    service: &'static str,
    queue: String,
    broker: BrokerPtr,
    pipeline: ActionPipeline,
    config: WorkerConfig,
    connection: Option<Box<dyn Connection>>,
    consumer: Option<Consumer>,
}

impl ServiceWorker {
    #[must_use]
    pub fn new(
        service: &'static str,
        queue: impl Into<String>,
        broker: BrokerPtr,
        pipeline: ActionPipeline,
        config: WorkerConfig,
    ) -> Self {
        Self {
            service,
            queue: queue.into(),
            broker,
            pipeline,
            config,
            connection: None,
            consumer: None,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Connects, declares the service queue and starts consuming it. The
    /// queue exists once this returns.
    ///
    /// # Errors
    ///
    /// Returns the broker error if any step fails.
    pub async fn start(&mut self) -> Result<(), WorkerError> {
        let connection = self.broker.connect().await?;
        connection
            .declare_queue(&self.queue, QueueOptions::default())
            .await?;
        let consumer = connection
            .consume(&self.queue, ConsumeOptions::manual(self.config.prefetch))
            .await?;
        info!(service = self.service, queue = %self.queue, "service worker started");
        self.connection = Some(connection);
        self.consumer = Some(consumer);
        Ok(())
    }

    /// Processes deliveries sequentially until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::NotStarted` if `start()` was not called first.
    pub async fn serve(mut self, shutdown: impl Future<Output = ()> + Send) -> Result<(), WorkerError> {
        let (Some(connection), Some(mut consumer)) = (self.connection.take(), self.consumer.take())
        else {
            return Err(WorkerError::NotStarted {
                service: self.service,
            });
        };

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                delivery = consumer.recv() => match delivery {
                    Some(delivery) => self.handle(connection.as_ref(), delivery).await,
                    None => {
                        warn!(service = self.service, "consumer cancelled by broker");
                        break;
                    }
                },
            }
        }

        drop(consumer);
        if let Err(err) = connection.close().await {
            warn!(service = self.service, error = %err, "failed to close worker connection");
        }
        info!(service = self.service, "service worker stopped");
        Ok(())
    }

    async fn handle(&mut self, connection: &dyn Connection, delivery: Delivery) {
        let Some(reply_to) = delivery.properties.reply_to.clone() else {
            warn!(service = self.service, "request without reply_to, dropping");
            ack(delivery).await;
            return;
        };

        let correlation_id = delivery.properties.correlation_id.clone();
        let reply = self.process(&delivery.body, correlation_id.clone()).await;
        let properties = MessageProperties {
            reply_to: None,
            correlation_id,
        };
        let published = connection.publish(&reply_to, properties, reply).await;
        settle(self.service, delivery, published).await;
    }

    /// Turns a request body into a reply body. Never fails: errors become
    /// `{"error": ...}` replies.
    async fn process(&mut self, body: &[u8], correlation_id: Option<String>) -> Bytes {
        let envelope: ServiceEnvelope = match decode(body) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(service = self.service, error = %err, "malformed request");
                return error_reply(err);
            }
        };

        if !self.config.processing_delay.is_zero() {
            tokio::time::sleep(self.config.processing_delay).await;
        }

        let request = ActionRequest::new(self.service, envelope).with_correlation_id(correlation_id);
        let result = match self.pipeline.ready().await {
            Ok(pipeline) => pipeline.call(request).await,
            Err(err) => Err(err),
        };
        let value: Value = result.unwrap_or_else(|err| err.to_reply());
        encode(&value).unwrap_or_else(error_reply)
    }
}

/// Acknowledges a handled request once its reply is out. A request whose
/// reply could not be published goes back to the queue instead.
async fn settle(
    service: &'static str,
    delivery: Delivery,
    published: Result<(), TransportError>,
) {
    let settled = match published {
        Ok(()) => delivery.ack().await,
        Err(err) => {
            warn!(service, error = %err, "failed to publish reply, requeueing request");
            delivery.reject(true).await
        }
    };
    if let Err(err) = settled {
        warn!(service, error = %err, "failed to settle delivery");
    }
}

async fn ack(delivery: Delivery) {
    if let Err(err) = delivery.ack().await {
        warn!(error = %err, "failed to acknowledge delivery");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
