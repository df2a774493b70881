//! Gateway dispatch loop with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` connects and begins consuming
//! the gateway queue, `serve()` dispatches calls until the shutdown future
//! resolves. The loop never waits on a backend: every accepted call is
//! acknowledged and handed to a spawned [`ForwardingTask`].

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use mqrpc_core::envelope::{decode, error_reply};
use mqrpc_core::{
    BrokerPtr, CallEnvelope, ConsumeOptions, Consumer, Connection, Delivery, QueueOptions,
    RpcCaller, TransportError,
};

use super::admission::Admission;
use super::config::{GatewayConfig, InvalidConfig};
use super::forward::ForwardingTask;
use super::reply::ReplyRoute;
use super::shutdown::ShutdownController;

/// Reply body for a call that names no service.
pub const MISSING_SERVICE_MESSAGE: &str = "service not specified";

/// Reply body for a call refused by admission control.
pub const OVERLOADED_MESSAGE: &str = "gateway overloaded, try again later";

/// Errors that stop the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway is not started")]
    NotStarted,
    #[error(transparent)]
    InvalidConfig(#[from] InvalidConfig),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Consumes the gateway queue and forwards calls to backend queues.
pub struct Gateway {
    config: GatewayConfig,
    caller: RpcCaller,
    admission: Admission,
    shutdown: Arc<ShutdownController>,
    connection: Option<Box<dyn Connection>>,
    consumer: Option<Consumer>,
}

impl Gateway {
    #[must_use]
    pub fn new(config: GatewayConfig, broker: BrokerPtr) -> Self {
        Self {
            admission: Admission::new(config.max_in_flight),
            config,
            caller: RpcCaller::new(broker),
            shutdown: Arc::new(ShutdownController::new()),
            connection: None,
            consumer: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Shared handle used to observe health and in-flight calls.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Validates the configuration, then connects, declares the gateway
    /// queue and starts consuming it with the configured prefetch. The queue
    /// exists once this returns.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidConfig` before touching the broker, or
    /// the broker error if any later step fails.
    pub async fn start(&mut self) -> Result<(), GatewayError> {
        self.config.validate()?;
        let connection = self.caller.broker().connect().await?;
        connection
            .declare_queue(&self.config.gateway_queue, QueueOptions::default())
            .await?;
        let consumer = connection
            .consume(
                &self.config.gateway_queue,
                ConsumeOptions::manual(self.config.prefetch),
            )
            .await?;

        info!(
            queue = %self.config.gateway_queue,
            prefetch = self.config.prefetch,
            hop_timeout_ms = u64::try_from(self.config.hop_timeout.as_millis()).unwrap_or(u64::MAX),
            "gateway consuming"
        );
        self.connection = Some(connection);
        self.consumer = Some(consumer);
        Ok(())
    }

    /// Dispatches calls until `shutdown` resolves or the shutdown controller
    /// is triggered, then drains in-flight forwarding tasks (bounded by
    /// `drain_timeout`) and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotStarted` if `start()` was not called first.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), GatewayError> {
        let (Some(connection), Some(mut consumer)) = (self.connection.take(), self.consumer.take())
        else {
            return Err(GatewayError::NotStarted);
        };

        let mut triggered = self.shutdown.shutdown_receiver();
        let triggered_early = *triggered.borrow();
        if !triggered_early {
            self.shutdown.set_ready();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    () = &mut shutdown => break,
                    Ok(()) = triggered.changed() => break,
                    delivery = consumer.recv() => match delivery {
                        Some(delivery) => self.dispatch(connection.as_ref(), delivery).await,
                        None => {
                            warn!(queue = %self.config.gateway_queue, "gateway consumer cancelled by broker");
                            break;
                        }
                    },
                }
            }
        }

        self.shutdown.trigger_shutdown();
        drop(consumer);
        info!(in_flight = self.shutdown.in_flight_count(), "gateway draining");
        if !self.shutdown.wait_for_drain(self.config.drain_timeout).await {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timeout expired, abandoning in-flight calls"
            );
        }

        if let Err(err) = connection.close().await {
            warn!(error = %err, "failed to close gateway connection");
        }
        info!("gateway stopped");
        Ok(())
    }

    /// Handles one inbound delivery. Always acknowledges it and never waits
    /// for a backend.
    async fn dispatch(&self, connection: &dyn Connection, delivery: Delivery) {
        let Some(route) = ReplyRoute::from_properties(&delivery.properties) else {
            warn!(
                delivery_tag = delivery.delivery_tag,
                "call without reply_to, dropping"
            );
            ack(delivery).await;
            return;
        };

        let envelope: CallEnvelope = match decode(&delivery.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(correlation_id = ?route.correlation_id, error = %err, "malformed call");
                route
                    .publish_best_effort(connection, error_reply(err))
                    .await;
                ack(delivery).await;
                return;
            }
        };

        let Some(service) = envelope.service_name().map(str::to_owned) else {
            debug!(correlation_id = ?route.correlation_id, "call without service");
            route
                .publish_best_effort(connection, error_reply(MISSING_SERVICE_MESSAGE))
                .await;
            ack(delivery).await;
            return;
        };

        let Some(admitted) = self.admission.try_admit() else {
            warn!(service = %service, "gateway saturated, refusing call");
            route
                .publish_best_effort(connection, error_reply(OVERLOADED_MESSAGE))
                .await;
            ack(delivery).await;
            return;
        };

        ack(delivery).await;

        debug!(
            service = %service,
            action = %envelope.action,
            correlation_id = ?route.correlation_id,
            "forwarding call"
        );
        let destination = self.config.service_queue(&service);
        let task = ForwardingTask::new(
            service,
            destination,
            envelope.into_service_envelope(),
            route,
            self.config.hop_timeout,
        );
        let guard = self.shutdown.in_flight_guard();
        let caller = self.caller.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let _admitted = admitted;
            task.run(caller).await;
        });
    }
}

async fn ack(delivery: Delivery) {
    if let Err(err) = delivery.ack().await {
        warn!(error = %err, "failed to acknowledge call");
    }
}
