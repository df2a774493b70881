//! Stateless numeric helper service.

use std::sync::Arc;

use serde_json::{json, Value};

use super::DomainService;
use crate::service::action::{service_names, ActionError, ActionRequest, ActionResponse};
use crate::service::router::ActionRouter;

#[derive(Debug, Default)]
pub struct MediaService;

impl MediaService {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Arithmetic mean of `numbers`.
    ///
    /// # Errors
    ///
    /// `InvalidParams` when the list is missing, empty or holds a non-number.
    pub fn average(numbers: &[f64]) -> Result<f64, ActionError> {
        if numbers.is_empty() {
            return Err(ActionError::InvalidParams("numbers list is empty".to_string()));
        }
        #[allow(clippy::cast_precision_loss)]
        let len = numbers.len() as f64;
        Ok(numbers.iter().sum::<f64>() / len)
    }

    fn handle_average(req: &ActionRequest) -> Result<ActionResponse, ActionError> {
        let numbers = match req.params.get("numbers") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(Value::as_f64)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    ActionError::InvalidParams("numbers must be a list of numbers".to_string())
                })?,
            Some(_) => {
                return Err(ActionError::InvalidParams(
                    "numbers must be a list of numbers".to_string(),
                ))
            }
        };
        Ok(json!({ "result": Self::average(&numbers)? }))
    }
}

impl DomainService for MediaService {
    fn name(&self) -> &'static str {
        service_names::MEDIA
    }

    fn router(self: Arc<Self>) -> ActionRouter {
        let mut router = ActionRouter::new();
        router.route("average", |req| Self::handle_average(&req));
        router
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use mqrpc_core::ServiceEnvelope;

    async fn average(params: Value) -> Value {
        let Value::Object(params) = params else {
            panic!("params must be an object");
        };
        let envelope = ServiceEnvelope {
            action: "average".to_string(),
            params,
        };
        Arc::new(MediaService::new())
            .router()
            .oneshot(ActionRequest::new(service_names::MEDIA, envelope))
            .await
            .unwrap_or_else(|err| err.to_reply())
    }

    #[tokio::test]
    async fn averages_mixed_numbers() {
        assert_eq!(average(json!({"numbers": [1, 2, 3, 4]})).await, json!({"result": 2.5}));
        assert_eq!(average(json!({"numbers": [-1.5, 1.5]})).await, json!({"result": 0.0}));
    }

    #[tokio::test]
    async fn empty_or_missing_list_is_rejected() {
        let empty = json!({"error": "numbers list is empty"});
        assert_eq!(average(json!({"numbers": []})).await, empty);
        assert_eq!(average(json!({})).await, empty);
    }

    #[tokio::test]
    async fn non_numeric_entries_are_rejected() {
        let expected = json!({"error": "numbers must be a list of numbers"});
        assert_eq!(average(json!({"numbers": [1, "two"]})).await, expected);
        assert_eq!(average(json!({"numbers": "1,2"})).await, expected);
    }
}
