//! Backend domain services.
//!
//! Each service owns its in-memory state behind a `parking_lot::Mutex` and
//! exposes its actions as an [`ActionRouter`]. A `ServiceWorker` consumes the
//! service's queue and drives the router one request at a time.

pub mod catalog;
pub mod media;
pub mod playlist;
pub mod users;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::service::router::ActionRouter;

pub use catalog::CatalogService;
pub use media::MediaService;
pub use playlist::PlaylistService;
pub use users::UsersService;

/// A backend service reachable through the gateway as `service.<name>`.
pub trait DomainService: Send + Sync + 'static {
    /// Service name as it appears in call envelopes.
    fn name(&self) -> &'static str;

    /// Builds the router serving this service's actions.
    fn router(self: Arc<Self>) -> ActionRouter;
}

/// The catalog, playlist, users and media services with fresh state.
#[must_use]
pub fn default_services() -> Vec<Arc<dyn DomainService>> {
    vec![
        Arc::new(CatalogService::new()),
        Arc::new(PlaylistService::new()),
        Arc::new(UsersService::new()),
        Arc::new(MediaService::new()),
    ]
}

/// Current wall-clock time as unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Counts occurrences and ranks them by count, highest first. Ties keep the
/// order in which each key was first seen.
pub(crate) fn rank_by_count<'a>(
    keys: impl IntoIterator<Item = &'a str>,
    limit: usize,
) -> Vec<(&'a str, usize)> {
    let mut slots: HashMap<&'a str, usize> = HashMap::new();
    let mut counts: Vec<(&'a str, usize)> = Vec::new();
    for key in keys {
        match slots.entry(key) {
            Entry::Occupied(slot) => counts[*slot.get()].1 += 1,
            Entry::Vacant(slot) => {
                slot.insert(counts.len());
                counts.push((key, 1));
            }
        }
    }
    // Stable sort: equal counts stay in first-seen order.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(limit);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranking_breaks_ties_by_first_occurrence() {
        let ranked = rank_by_count(["m2", "m1", "m1", "m3", "m2", "m3"], 10);
        assert_eq!(ranked, vec![("m2", 2), ("m1", 2), ("m3", 2)]);

        let ranked = rank_by_count(["a", "b", "b", "c"], 2);
        assert_eq!(ranked, vec![("b", 2), ("a", 1)]);
    }

    #[test]
    fn ranking_scales_to_many_distinct_keys() {
        let keys: Vec<String> = (0..20_000).map(|n| format!("m{n:05}")).collect();
        let mut plays: Vec<&str> = keys.iter().map(String::as_str).collect();
        plays.extend(["m19999", "m19999", "m00042"]);

        let ranked = rank_by_count(plays, 3);
        assert_eq!(ranked, vec![("m19999", 3), ("m00042", 2), ("m00000", 1)]);
    }

    #[test]
    fn default_services_cover_all_domains() {
        let names: Vec<_> = default_services().iter().map(|svc| svc.name()).collect();
        assert_eq!(names, vec!["catalog", "playlist", "users", "media"]);
    }

    #[test]
    fn clock_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
