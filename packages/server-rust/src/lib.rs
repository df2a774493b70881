//! `mqrpc` server: the RPC gateway, the backend service workers, and the
//! node that runs them together on one broker.

pub mod gateway;
pub mod logging;
pub mod node;
pub mod service;

pub use gateway::{Gateway, GatewayConfig, GatewayError, HealthState, ShutdownController};
pub use node::{Node, NodeConfig, NodeError, RunningNode};
pub use service::{ServiceWorker, WorkerConfig};
