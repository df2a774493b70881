//! Optional admission control for forwarding tasks.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Slot held by an admitted call for as long as its forwarding task runs.
#[derive(Debug)]
pub struct Admitted {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Caps concurrent forwarding tasks with a semaphore. Without a limit every
/// call is admitted.
///
/// A full gateway refuses the call immediately rather than queueing it.
#[derive(Debug, Clone)]
pub struct Admission {
    slots: Option<Arc<Semaphore>>,
}

impl Admission {
    #[must_use]
    pub fn new(max_in_flight: Option<usize>) -> Self {
        Self {
            slots: max_in_flight.map(|max| Arc::new(Semaphore::new(max))),
        }
    }

    /// Takes a slot without waiting. `None` when the gateway is saturated.
    #[must_use]
    pub fn try_admit(&self) -> Option<Admitted> {
        match &self.slots {
            None => Some(Admitted { _permit: None }),
            Some(slots) => Arc::clone(slots)
                .try_acquire_owned()
                .ok()
                .map(|permit| Admitted {
                    _permit: Some(permit),
                }),
        }
    }

    /// Free slots, or `None` when unbounded.
    #[must_use]
    pub fn available(&self) -> Option<usize> {
        self.slots.as_ref().map(|slots| slots.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_always_admits() {
        let admission = Admission::new(None);
        let held: Vec<_> = (0..1000).map(|_| admission.try_admit()).collect();
        assert!(held.iter().all(Option::is_some));
        assert_eq!(admission.available(), None);
    }

    #[test]
    fn bounded_refuses_when_full_and_recovers() {
        let admission = Admission::new(Some(2));
        let first = admission.try_admit().unwrap();
        let _second = admission.try_admit().unwrap();
        assert!(admission.try_admit().is_none());
        assert_eq!(admission.available(), Some(0));

        drop(first);
        assert!(admission.try_admit().is_some());
    }
}
