use std::time::Duration;

/// Configuration for a backend `ServiceWorker`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum unacknowledged deliveries handed to the worker at once.
    pub prefetch: u16,
    /// Upper bound for a single action before it fails with a timeout reply.
    pub action_timeout: Duration,
    /// Artificial delay before each action, used to simulate slow backends.
    pub processing_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            prefetch: 1,
            action_timeout: Duration::from_secs(5),
            processing_delay: Duration::ZERO,
        }
    }
}
