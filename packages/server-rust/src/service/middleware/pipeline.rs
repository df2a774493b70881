//! Pipeline composition: wraps an `ActionRouter` in the middleware stack.

use tower::util::BoxService;
use tower::ServiceBuilder;

use super::guard::ActionGuardLayer;
use crate::service::action::{ActionError, ActionRequest, ActionResponse};
use crate::service::config::WorkerConfig;
use crate::service::router::ActionRouter;

/// Type-erased action pipeline owned by a `ServiceWorker`.
pub type ActionPipeline = BoxService<ActionRequest, ActionResponse, ActionError>;

/// Builds the action pipeline for one backend service: the router behind
/// an [`ActionGuardLayer`] bounded by `config.action_timeout`.
#[must_use]
pub fn build_action_pipeline(router: ActionRouter, config: &WorkerConfig) -> ActionPipeline {
    BoxService::new(
        ServiceBuilder::new()
            .layer(ActionGuardLayer::new(config.action_timeout))
            .service(router),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
