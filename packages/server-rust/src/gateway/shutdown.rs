//! Graceful shutdown controller with in-flight call tracking.
//!
//! Health state lives in an `ArcSwap` for lock-free reads. In-flight calls
//! are counted with RAII guards; the last guard to drop wakes anyone waiting
//! for the drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};

/// Lifecycle of a gateway, in order. A drain that times out never reaches
/// `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Connected but not yet consuming calls.
    Starting,
    /// Consuming and forwarding calls.
    Ready,
    /// No longer consuming; waiting for forwarding tasks to finish.
    Draining,
    /// Every forwarding task finished.
    Stopped,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    idle: Notify,
}

/// Coordinates gateway shutdown.
///
/// 1. `set_ready()` once the dispatch loop consumes
/// 2. each forwarding task holds an [`InFlightGuard`]
/// 3. `trigger_shutdown()` moves to Draining and signals receivers
/// 4. `wait_for_drain()` waits for the guards, bounded by a timeout
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<InFlight>,
    health_state: ArcSwap<HealthState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(InFlight::default()),
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Returns a receiver that flips to `true` when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Moves to `Draining` and notifies every shutdown receiver.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        // Receivers may all be gone.
        let _ = self.shutdown_signal.send(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Tracks one in-flight call until the guard is dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits until no call is in flight, up to `timeout`.
    ///
    /// Returns `true` (and moves to `Stopped`) on a full drain, `false` if
    /// the timeout expired first (state stays `Draining`).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking the counter so a guard
            // dropped in between still wakes us.
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.in_flight_count() == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }

            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return false;
            }
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when dropped, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_reaches_stopped_when_idle() {
        let controller = ShutdownController::default();
        assert_eq!(controller.health_state(), HealthState::Starting);
        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);

        let mut signal = controller.shutdown_receiver();
        controller.trigger_shutdown();
        assert!(signal.has_changed().unwrap());
        assert!(*signal.borrow_and_update());
        assert_eq!(controller.health_state(), HealthState::Draining);

        assert!(controller.wait_for_drain(Duration::from_secs(1)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[test]
    fn counter_follows_guard_lifetimes() {
        let controller = ShutdownController::new();
        let guards: Vec<_> = (0..3).map(|_| controller.in_flight_guard()).collect();
        assert_eq!(controller.in_flight_count(), 3);
        drop(guards);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_wakes_when_last_call_finishes() {
        let controller = ShutdownController::new();
        let forwarding = controller.in_flight_guard();
        let replying = controller.in_flight_guard();
        controller.trigger_shutdown();

        let finisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(forwarding);
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(replying);
        });

        let started = tokio::time::Instant::now();
        assert!(controller.wait_for_drain(Duration::from_secs(5)).await);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(40) && waited < Duration::from_secs(5));
        finisher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn expired_drain_stays_draining() {
        let controller = ShutdownController::new();
        let _stuck = controller.in_flight_guard();
        controller.trigger_shutdown();

        assert!(!controller.wait_for_drain(Duration::from_millis(30)).await);
        assert_eq!(controller.health_state(), HealthState::Draining);
        assert_eq!(controller.in_flight_count(), 1);
    }
}
