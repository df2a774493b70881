//! Per-action guard: a deadline plus one tracing span per action.
//!
//! The span carries `service`, `action` and the request's `correlation_id`,
//! and is closed with `elapsed_ms` and an `outcome` taken from
//! [`ActionError::kind`]. An action that outlives the deadline is dropped
//! and answered with `ActionError::Timeout`.

use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, field, info_span, Instrument, Span};

use crate::service::action::{ActionError, ActionRequest, ActionResponse};
use crate::service::router::ActionFuture;

/// Wraps a backend's router in [`ActionGuard`].
#[derive(Debug, Clone, Copy)]
pub struct ActionGuardLayer {
    deadline: Duration,
}

impl ActionGuardLayer {
    #[must_use]
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }
}

impl<S> Layer<S> for ActionGuardLayer {
    type Service = ActionGuard<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ActionGuard {
            inner,
            deadline: self.deadline,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionGuard<S> {
    inner: S,
    deadline: Duration,
}

fn action_span(req: &ActionRequest) -> Span {
    info_span!(
        "action",
        service = req.service_name,
        action = %req.action,
        correlation_id = req.correlation_id.as_deref().unwrap_or("-"),
        elapsed_ms = field::Empty,
        outcome = field::Empty,
    )
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl<S> Service<ActionRequest> for ActionGuard<S>
where
    S: Service<ActionRequest, Response = ActionResponse, Error = ActionError>,
    S::Future: Send + 'static,
{
    type Response = ActionResponse;
    type Error = ActionError;
    type Future = ActionFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ActionError>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ActionRequest) -> ActionFuture {
        let span = action_span(&req);
        let deadline = self.deadline;
        let handler = self.inner.call(req);

        Box::pin(
            async move {
                let started = Instant::now();
                let result = tokio::time::timeout(deadline, handler)
                    .await
                    .unwrap_or_else(|_elapsed| {
                        Err(ActionError::Timeout {
                            timeout_ms: millis(deadline),
                        })
                    });

                let span = Span::current();
                let outcome = result.as_ref().map_or_else(ActionError::kind, |_| "ok");
                span.record("elapsed_ms", millis(started.elapsed()));
                span.record("outcome", outcome);
                debug!(outcome, "action finished");
                result
            }
            .instrument(span),
        )
    }
}
