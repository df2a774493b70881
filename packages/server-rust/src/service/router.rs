//! Action routing: dispatches an `ActionRequest` to its handler by `action` name.

use std::collections::HashMap;
use std::future::{ready, Future};
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{service_fn, Service};

use super::action::{ActionError, ActionRequest, ActionResponse};

// ---------------------------------------------------------------------------
// Handler type aliases
// ---------------------------------------------------------------------------

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<ActionResponse, ActionError>> + Send>>;

/// A boxed Tower service that handles a single action.
type BoxedHandler = Box<
    dyn Service<ActionRequest, Response = ActionResponse, Error = ActionError, Future = ActionFuture>
        + Send,
>;

// ---------------------------------------------------------------------------
// ActionRouter
// ---------------------------------------------------------------------------

/// Routes `ActionRequest` values to the handler registered for their action.
///
/// Requests naming an unregistered action fail with
/// `ActionError::UnknownAction`, which the worker turns into
/// `{"error": "action '<x>' not recognized"}`.
pub struct ActionRouter {
    handlers: HashMap<&'static str, BoxedHandler>,
}

impl ActionRouter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a Tower service for the given action.
    pub fn register<S>(&mut self, action: &'static str, service: S)
    where
        S: Service<ActionRequest, Response = ActionResponse, Error = ActionError> + Send + 'static,
        S::Future: Send + 'static,
    {
        self.handlers.insert(action, Box::new(HandlerWrapper(service)));
    }

    /// Registers a synchronous handler function for the given action.
    pub fn route<F>(&mut self, action: &'static str, handler: F)
    where
        F: Fn(ActionRequest) -> Result<ActionResponse, ActionError> + Send + 'static,
    {
        self.register(action, service_fn(move |req| ready(handler(req))));
    }

    /// Registered action names, sorted.
    #[must_use]
    pub fn actions(&self) -> Vec<&'static str> {
        let mut actions: Vec<_> = self.handlers.keys().copied().collect();
        actions.sort_unstable();
        actions
    }
}

impl Default for ActionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<ActionRequest> for ActionRouter {
    type Response = ActionResponse;
    type Error = ActionError;
    type Future = ActionFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        for handler in self.handlers.values_mut() {
            match handler.poll_ready(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ActionRequest) -> Self::Future {
        match self.handlers.get_mut(req.action.as_str()) {
            Some(handler) => handler.call(req),
            None => Box::pin(async move { Err(ActionError::UnknownAction { action: req.action }) }),
        }
    }
}

// ---------------------------------------------------------------------------
// HandlerWrapper (type-erased adapter)
// ---------------------------------------------------------------------------

struct HandlerWrapper<S>(S);

impl<S> Service<ActionRequest> for HandlerWrapper<S>
where
    S: Service<ActionRequest, Response = ActionResponse, Error = ActionError> + Send,
    S::Future: Send + 'static,
{
    type Response = ActionResponse;
    type Error = ActionError;
    type Future = ActionFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_ready(cx)
    }

    fn call(&mut self, req: ActionRequest) -> Self::Future {
        Box::pin(self.0.call(req))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use mqrpc_core::Params;

    fn request(action: &str) -> ActionRequest {
        ActionRequest {
            service_name: "test",
            action: action.to_string(),
            params: Params::new(),
            correlation_id: None,
        }
    }

    fn router() -> ActionRouter {
        let mut router = ActionRouter::new();
        router.route("ping", |_req| Ok(json!({"pong": true})));
        router.route("echo", |req| Ok(json!({"action": req.action})));
        router
    }

    #[tokio::test]
    async fn routes_to_registered_action() {
        let resp = router().oneshot(request("ping")).await.unwrap();
        assert_eq!(resp, json!({"pong": true}));
    }

    #[tokio::test]
    async fn unknown_action_returns_error() {
        let err = router().oneshot(request("dance")).await.unwrap_err();
        assert!(matches!(
            err,
            ActionError::UnknownAction { action } if action == "dance"
        ));
    }

    #[tokio::test]
    async fn routes_to_correct_action_among_multiple() {
        let mut router = router();
        let resp = ServiceExt::ready(&mut router)
            .await
            .unwrap()
            .call(request("echo"))
            .await
            .unwrap();
        assert_eq!(resp, json!({"action": "echo"}));
        assert_eq!(router.actions(), vec!["echo", "ping"]);
    }
}
