//! Static music catalogue.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use super::DomainService;
use crate::service::action::{service_names, ActionError, ActionRequest, ActionResponse};
use crate::service::router::ActionRouter;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Track {
    pub id: &'static str,
    pub title: &'static str,
    pub artist: &'static str,
    pub album: &'static str,
    /// Length in seconds.
    pub duration: u32,
    pub genre: &'static str,
}

impl Track {
    fn matches(&self, needle: &str) -> bool {
        [self.title, self.artist, self.album, self.genre]
            .iter()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

static TRACKS: [Track; 6] = [
    Track {
        id: "m001",
        title: "Bohemian Rhapsody",
        artist: "Queen",
        album: "A Night at the Opera",
        duration: 354,
        genre: "rock",
    },
    Track {
        id: "m002",
        title: "We Will Rock You",
        artist: "Queen",
        album: "News of the World",
        duration: 122,
        genre: "rock",
    },
    Track {
        id: "m003",
        title: "Hotel California",
        artist: "Eagles",
        album: "Hotel California",
        duration: 391,
        genre: "rock",
    },
    Track {
        id: "m004",
        title: "Imagine",
        artist: "John Lennon",
        album: "Imagine",
        duration: 183,
        genre: "pop",
    },
    Track {
        id: "m005",
        title: "Billie Jean",
        artist: "Michael Jackson",
        album: "Thriller",
        duration: 294,
        genre: "pop",
    },
    Track {
        id: "m006",
        title: "Smells Like Teen Spirit",
        artist: "Nirvana",
        album: "Nevermind",
        duration: 301,
        genre: "rock",
    },
];

/// Read-only catalogue of tracks, in id order.
#[derive(Debug, Default)]
pub struct CatalogService;

impl CatalogService {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn tracks(&self) -> &'static [Track] {
        &TRACKS
    }

    /// Tracks whose title, artist, album or genre contains `query`
    /// (case-insensitive).
    #[must_use]
    pub fn search(&self, query: &str, limit: usize) -> Vec<&'static Track> {
        let needle = query.to_lowercase();
        TRACKS
            .iter()
            .filter(|track| track.matches(&needle))
            .take(limit)
            .collect()
    }

    #[must_use]
    pub fn by_artist(&self, artist: &str) -> Vec<&'static Track> {
        let needle = artist.to_lowercase();
        TRACKS
            .iter()
            .filter(|track| track.artist.to_lowercase().contains(&needle))
            .collect()
    }

    #[must_use]
    pub fn by_genre(&self, genre: &str) -> Vec<&'static Track> {
        let needle = genre.to_lowercase();
        TRACKS
            .iter()
            .filter(|track| track.genre.to_lowercase().contains(&needle))
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&'static Track> {
        TRACKS.iter().find(|track| track.id == id)
    }

    // -- action handlers ----------------------------------------------------

    fn handle_search(&self, req: &ActionRequest) -> ActionResponse {
        let query = req.str_param("query").unwrap_or_default();
        results(&self.search(query, req.limit_param("limit", 10)))
    }

    fn handle_list_by_artist(&self, req: &ActionRequest) -> ActionResponse {
        results(&self.by_artist(req.str_param("artist").unwrap_or_default()))
    }

    fn handle_list_by_genre(&self, req: &ActionRequest) -> ActionResponse {
        results(&self.by_genre(req.str_param("genre").unwrap_or_default()))
    }

    fn handle_get_details(&self, req: &ActionRequest) -> Result<ActionResponse, ActionError> {
        req.str_param("music_id")
            .and_then(|id| self.get(id))
            .map(|track| json!({ "music": track }))
            .ok_or_else(|| ActionError::NotFound("music not found".to_string()))
    }

    fn handle_list_all(&self, req: &ActionRequest) -> ActionResponse {
        let limit = req.limit_param("limit", 20);
        let tracks: Vec<_> = TRACKS.iter().take(limit).collect();
        results(&tracks)
    }
}

fn results(tracks: &[&Track]) -> ActionResponse {
    json!({ "results": tracks, "count": tracks.len() })
}

impl DomainService for CatalogService {
    fn name(&self) -> &'static str {
        service_names::CATALOG
    }

    fn router(self: Arc<Self>) -> ActionRouter {
        let mut router = ActionRouter::new();
        let svc = Arc::clone(&self);
        router.route("search", move |req| Ok(svc.handle_search(&req)));
        let svc = Arc::clone(&self);
        router.route("list_by_artist", move |req| Ok(svc.handle_list_by_artist(&req)));
        let svc = Arc::clone(&self);
        router.route("list_by_genre", move |req| Ok(svc.handle_list_by_genre(&req)));
        let svc = Arc::clone(&self);
        router.route("get_details", move |req| svc.handle_get_details(&req));
        router.route("list_all", move |req| Ok(self.handle_list_all(&req)));
        router
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn request(action: &str, params: Value) -> ActionRequest {
        let Value::Object(params) = params else {
            panic!("params must be an object");
        };
        ActionRequest {
            service_name: service_names::CATALOG,
            action: action.to_string(),
            params,
            correlation_id: None,
        }
    }

    async fn call(action: &str, params: Value) -> Result<ActionResponse, ActionError> {
        Arc::new(CatalogService::new())
            .router()
            .oneshot(request(action, params))
            .await
    }

    fn ids(resp: &Value) -> Vec<&str> {
        resp["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|track| track["id"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn search_matches_any_field_case_insensitively() {
        let resp = call("search", json!({"query": "QUEEN"})).await.unwrap();
        assert_eq!(ids(&resp), vec!["m001", "m002"]);
        assert_eq!(resp["count"], 2);

        let resp = call("search", json!({"query": "pop"})).await.unwrap();
        assert_eq!(ids(&resp), vec!["m004", "m005"]);

        let resp = call("search", json!({"query": "thriller"})).await.unwrap();
        assert_eq!(ids(&resp), vec!["m005"]);
    }

    #[tokio::test]
    async fn search_respects_limit() {
        let resp = call("search", json!({"query": "rock", "limit": 2})).await.unwrap();
        assert_eq!(ids(&resp), vec!["m001", "m002"]);

        let resp = call("search", json!({})).await.unwrap();
        assert_eq!(resp["count"], 6);
    }

    #[tokio::test]
    async fn list_by_artist_and_genre() {
        let resp = call("list_by_artist", json!({"artist": "nirvana"})).await.unwrap();
        assert_eq!(ids(&resp), vec!["m006"]);

        let resp = call("list_by_genre", json!({"genre": "Rock"})).await.unwrap();
        assert_eq!(ids(&resp), vec!["m001", "m002", "m003", "m006"]);
    }

    #[tokio::test]
    async fn get_details_found_and_missing() {
        let resp = call("get_details", json!({"music_id": "m003"})).await.unwrap();
        assert_eq!(resp["music"]["title"], "Hotel California");
        assert_eq!(resp["music"]["duration"], 391);

        let err = call("get_details", json!({"music_id": "m999"})).await.unwrap_err();
        assert_eq!(err.to_reply(), json!({"error": "music not found"}));

        let err = call("get_details", json!({})).await.unwrap_err();
        assert!(matches!(err, ActionError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_all_defaults_and_limit() {
        let resp = call("list_all", json!({})).await.unwrap();
        assert_eq!(resp["count"], 6);

        let resp = call("list_all", json!({"limit": 3})).await.unwrap();
        assert_eq!(ids(&resp), vec!["m001", "m002", "m003"]);
    }

    #[tokio::test]
    async fn unknown_action() {
        let err = call("play", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "action 'play' not recognized");
    }
}
