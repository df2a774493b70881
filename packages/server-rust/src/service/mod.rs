//! Backend service framework.
//!
//! Each backend request flows through:
//!
//! 1. **Worker** (`worker`): consumes `service.<name>`, decodes the inner envelope
//! 2. **Middleware** (`middleware`): action deadline and tracing span
//! 3. **Routing** (`router`): dispatch to the handler registered for `action`
//! 4. **Domain services** (`domain`): catalog, playlist, users and media

pub mod action;
pub mod config;
pub mod domain;
pub mod middleware;
pub mod router;
pub mod worker;

pub use action::{service_names, ActionError, ActionRequest, ActionResponse};
pub use config::WorkerConfig;
pub use domain::{default_services, DomainService};
pub use middleware::{build_action_pipeline, ActionPipeline};
pub use router::ActionRouter;
pub use worker::{ServiceWorker, WorkerError};
