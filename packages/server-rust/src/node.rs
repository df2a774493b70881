//! A complete node: the gateway plus one worker per backend service, all on
//! one broker.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mqrpc_core::{BrokerPtr, GatewayClient};

use crate::gateway::{Gateway, GatewayConfig, GatewayError, ShutdownController};
use crate::service::{
    build_action_pipeline, default_services, DomainService, ServiceWorker, WorkerConfig,
    WorkerError,
};

#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub gateway: GatewayConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),
    #[error("worker: {0}")]
    Worker(#[from] WorkerError),
}

/// Gateway and backend workers sharing one broker.
///
/// Deferred startup like its parts: `new()` wires everything, `start()`
/// declares every queue, `serve()` runs until the shutdown future resolves.
/// On shutdown the gateway drains first so in-flight calls can still reach
/// their backends, then the workers stop.
pub struct Node {
    broker: BrokerPtr,
    gateway: Gateway,
    workers: Vec<ServiceWorker>,
}

impl Node {
    /// Node serving the catalog, playlist, users and media services.
    #[must_use]
    pub fn new(broker: BrokerPtr, config: NodeConfig) -> Self {
        Self::with_services(broker, config, default_services())
    }

    #[must_use]
    pub fn with_services(
        broker: BrokerPtr,
        config: NodeConfig,
        services: Vec<Arc<dyn DomainService>>,
    ) -> Self {
        let workers = services
            .into_iter()
            .map(|service| {
                let name = service.name();
                let pipeline = build_action_pipeline(service.router(), &config.worker);
                ServiceWorker::new(
                    name,
                    config.gateway.service_queue(name),
                    Arc::clone(&broker),
                    pipeline,
                    config.worker.clone(),
                )
            })
            .collect();

        Self {
            gateway: Gateway::new(config.gateway, Arc::clone(&broker)),
            broker,
            workers,
        }
    }

    /// Client bound to this node's gateway queue.
    #[must_use]
    pub fn client(&self) -> GatewayClient {
        GatewayClient::new(Arc::clone(&self.broker))
            .with_gateway_queue(self.gateway.config().gateway_queue.clone())
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        self.gateway.shutdown_controller()
    }

    /// Checks the gateway configuration, then starts every worker and the
    /// gateway.
    ///
    /// # Errors
    ///
    /// Returns the configuration error, or the first component that fails
    /// to start.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        self.gateway
            .config()
            .validate()
            .map_err(GatewayError::from)?;
        for worker in &mut self.workers {
            worker.start().await?;
        }
        self.gateway.start().await?;
        info!(
            endpoint = self.broker.endpoint(),
            workers = self.workers.len(),
            "node started"
        );
        Ok(())
    }

    /// Serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns the gateway's error; worker failures are logged.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send) -> Result<(), NodeError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handles: Vec<_> = self
            .workers
            .into_iter()
            .map(|worker| {
                let mut stop = stop_rx.clone();
                tokio::spawn(worker.serve(async move {
                    let _ = stop.wait_for(|stop| *stop).await;
                }))
            })
            .collect();

        let result = self.gateway.serve(shutdown).await;

        // Receivers are held by the worker futures.
        let _ = stop_tx.send(true);
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "worker failed"),
                Err(err) => warn!(error = %err, "worker task panicked"),
            }
        }
        info!("node stopped");
        result.map_err(NodeError::from)
    }

    /// Starts the node and serves it on a background task.
    ///
    /// # Errors
    ///
    /// Returns the startup error; nothing is left running in that case.
    pub async fn launch(mut self) -> Result<RunningNode, NodeError> {
        self.start().await?;
        let client = self.client();
        let controller = self.shutdown_controller();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(self.serve(async move {
            let _ = stop_rx.await;
        }));
        Ok(RunningNode {
            client,
            controller,
            stop: stop_tx,
            handle,
        })
    }
}

/// Handle to a node serving on a background task.
pub struct RunningNode {
    client: GatewayClient,
    controller: Arc<ShutdownController>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), NodeError>>,
}

impl RunningNode {
    #[must_use]
    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> &Arc<ShutdownController> {
        &self.controller
    }

    /// Signals shutdown and waits for the node to stop.
    ///
    /// # Errors
    ///
    /// Returns the node's error, or an error if its task panicked.
    pub async fn stop(self) -> anyhow::Result<()> {
        // The serve task may already be gone.
        let _ = self.stop.send(());
        self.handle.await??;
        Ok(())
    }
}
