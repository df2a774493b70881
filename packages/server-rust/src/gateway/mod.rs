//! RPC gateway: consumes the gateway queue and forwards each call to its
//! backend queue on an independent task.

pub mod admission;
pub mod config;
pub mod dispatch;
pub mod forward;
pub mod reply;
pub mod shutdown;

pub use admission::Admission;
pub use config::{GatewayConfig, InvalidConfig, DEFAULT_HOP_TIMEOUT, DEFAULT_SERVICE_QUEUE_PREFIX};
pub use dispatch::{Gateway, GatewayError, MISSING_SERVICE_MESSAGE, OVERLOADED_MESSAGE};
pub use forward::{backend_timeout_message, ForwardingTask};
pub use reply::ReplyRoute;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
