//! Gateway configuration.

use std::time::Duration;

use mqrpc_core::transport::validate_queue_name;
use mqrpc_core::DEFAULT_GATEWAY_QUEUE;

/// Prefix joined with a service name to form its backend queue.
pub const DEFAULT_SERVICE_QUEUE_PREFIX: &str = "service.";

/// How long a forwarding task waits for a backend reply.
pub const DEFAULT_HOP_TIMEOUT: Duration = Duration::from_secs(15);

/// A gateway setting the dispatch loop cannot run with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid gateway config: {field} {reason}")]
pub struct InvalidConfig {
    pub field: &'static str,
    pub reason: &'static str,
}

/// Configuration for the gateway dispatch loop.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Queue external callers publish to.
    pub gateway_queue: String,
    /// Backend queue for service `X` is `service_queue_prefix + X`.
    pub service_queue_prefix: String,
    /// Deadline for the gateway-to-backend hop.
    pub hop_timeout: Duration,
    /// Unacknowledged deliveries the dispatch loop may hold.
    pub prefetch: u16,
    /// Concurrent forwarding tasks before calls are refused. `None` means
    /// unbounded.
    pub max_in_flight: Option<usize>,
    /// Time granted to in-flight forwarding tasks after shutdown is signalled.
    pub drain_timeout: Duration,
}

impl GatewayConfig {
    /// Checks the settings every forwarded call depends on.
    ///
    /// # Errors
    ///
    /// Returns the first setting that is out of range.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        let invalid = |field, reason| Err(InvalidConfig { field, reason });
        if self.hop_timeout.is_zero() {
            return invalid("hop_timeout", "must be greater than zero");
        }
        if self.max_in_flight == Some(0) {
            return invalid("max_in_flight", "must allow at least one call");
        }
        if validate_queue_name(&self.gateway_queue).is_err() {
            return invalid("gateway_queue", "is not a valid queue name");
        }
        Ok(())
    }

    /// Backend queue name for `service`.
    #[must_use]
    pub fn service_queue(&self, service: &str) -> String {
        format!("{}{service}", self.service_queue_prefix)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_queue: DEFAULT_GATEWAY_QUEUE.to_string(),
            service_queue_prefix: DEFAULT_SERVICE_QUEUE_PREFIX.to_string(),
            hop_timeout: DEFAULT_HOP_TIMEOUT,
            prefetch: 1,
            max_in_flight: None,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.gateway_queue, "rpc_gateway");
        assert_eq!(config.hop_timeout, Duration::from_secs(15));
        assert_eq!(config.prefetch, 1);
        assert!(config.max_in_flight.is_none());
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        assert_eq!(GatewayConfig::default().validate(), Ok(()));

        let zero_hop = GatewayConfig {
            hop_timeout: Duration::ZERO,
            ..GatewayConfig::default()
        };
        let err = zero_hop.validate().unwrap_err();
        assert_eq!(err.field, "hop_timeout");
        assert_eq!(
            err.to_string(),
            "invalid gateway config: hop_timeout must be greater than zero"
        );

        let no_slots = GatewayConfig {
            max_in_flight: Some(0),
            ..GatewayConfig::default()
        };
        assert_eq!(no_slots.validate().unwrap_err().field, "max_in_flight");

        let unnamed = GatewayConfig {
            gateway_queue: String::new(),
            ..GatewayConfig::default()
        };
        assert_eq!(unnamed.validate().unwrap_err().field, "gateway_queue");
    }

    #[test]
    fn service_queue_joins_prefix() {
        let config = GatewayConfig::default();
        assert_eq!(config.service_queue("catalog"), "service.catalog");

        let config = GatewayConfig {
            service_queue_prefix: "backend/".to_string(),
            ..GatewayConfig::default()
        };
        assert_eq!(config.service_queue("users"), "backend/users");
    }
}
