//! User playlists.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{now_millis, DomainService};
use crate::service::action::{service_names, ActionError, ActionRequest, ActionResponse};
use crate::service::router::ActionRouter;

const NOT_FOUND: &str = "playlist not found";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Playlist {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub music_ids: Vec<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Playlist {
    fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

fn generate_playlist_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    format!("pl_{id}")
}

fn not_found() -> ActionError {
    ActionError::NotFound(NOT_FOUND.to_string())
}

/// In-memory playlist store. Playlists are kept in creation order.
#[derive(Debug, Default)]
pub struct PlaylistService {
    playlists: Mutex<Vec<Playlist>>,
}

impl PlaylistService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, user_id: &str, name: &str, description: &str) -> Playlist {
        let now = now_millis();
        let playlist = Playlist {
            id: generate_playlist_id(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            music_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.playlists.lock().push(playlist.clone());
        playlist
    }

    #[must_use]
    pub fn get(&self, playlist_id: &str) -> Option<Playlist> {
        self.playlists
            .lock()
            .iter()
            .find(|playlist| playlist.id == playlist_id)
            .cloned()
    }

    #[must_use]
    pub fn list_for_user(&self, user_id: &str) -> Vec<Playlist> {
        self.playlists
            .lock()
            .iter()
            .filter(|playlist| playlist.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Appends tracks not already present, keeping their given order.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::NotFound` for an unknown playlist.
    pub fn add_music<'a>(
        &self,
        playlist_id: &str,
        music_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<Playlist, ActionError> {
        self.update_with(playlist_id, |playlist| {
            for music_id in music_ids {
                if !playlist.music_ids.iter().any(|id| id == music_id) {
                    playlist.music_ids.push(music_id.to_string());
                }
            }
            playlist.touch();
        })
    }

    /// Removes a track. Removing a track that is not in the playlist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::NotFound` for an unknown playlist.
    pub fn remove_music(&self, playlist_id: &str, music_id: &str) -> Result<Playlist, ActionError> {
        self.update_with(playlist_id, |playlist| {
            if let Some(pos) = playlist.music_ids.iter().position(|id| id == music_id) {
                playlist.music_ids.remove(pos);
                playlist.touch();
            }
        })
    }

    /// Renames and/or re-describes a playlist. An empty `name` is ignored.
    ///
    /// # Errors
    ///
    /// Returns `ActionError::NotFound` for an unknown playlist.
    pub fn update(
        &self,
        playlist_id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Playlist, ActionError> {
        self.update_with(playlist_id, |playlist| {
            if let Some(name) = name.filter(|name| !name.is_empty()) {
                playlist.name = name.to_string();
            }
            if let Some(description) = description {
                playlist.description = description.to_string();
            }
            playlist.touch();
        })
    }

    /// Deletes a playlist. Returns `false` if it did not exist.
    pub fn delete(&self, playlist_id: &str) -> bool {
        let mut playlists = self.playlists.lock();
        let before = playlists.len();
        playlists.retain(|playlist| playlist.id != playlist_id);
        playlists.len() != before
    }

    fn update_with(
        &self,
        playlist_id: &str,
        apply: impl FnOnce(&mut Playlist),
    ) -> Result<Playlist, ActionError> {
        let mut playlists = self.playlists.lock();
        let playlist = playlists
            .iter_mut()
            .find(|playlist| playlist.id == playlist_id)
            .ok_or_else(not_found)?;
        apply(playlist);
        Ok(playlist.clone())
    }

    // -- action handlers ----------------------------------------------------

    fn handle_create(&self, req: &ActionRequest) -> Result<ActionResponse, ActionError> {
        let (Some(user_id), Some(name)) = (req.str_param("user_id"), req.str_param("name")) else {
            return Err(ActionError::InvalidParams(
                "user_id and name are required".to_string(),
            ));
        };
        let description = req
            .params
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let playlist = self.create(user_id, name, description);
        Ok(json!({ "playlist_id": playlist.id, "playlist": playlist }))
    }

    fn handle_get(&self, req: &ActionRequest) -> Result<ActionResponse, ActionError> {
        let playlist = req
            .str_param("playlist_id")
            .and_then(|id| self.get(id))
            .ok_or_else(not_found)?;
        Ok(json!({ "playlist": playlist }))
    }

    fn handle_list_user_playlists(&self, req: &ActionRequest) -> ActionResponse {
        let playlists = req
            .str_param("user_id")
            .map(|user_id| self.list_for_user(user_id))
            .unwrap_or_default();
        json!({ "count": playlists.len(), "playlists": playlists })
    }

    fn handle_add_music(&self, req: &ActionRequest) -> Result<ActionResponse, ActionError> {
        let playlist_id = req.str_param("playlist_id").unwrap_or_default();
        // A single id may be sent as a bare string.
        let music_ids: Vec<&str> = match req.params.get("music_ids") {
            Some(Value::String(id)) => vec![id.as_str()],
            Some(Value::Array(ids)) => ids.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        let playlist = self.add_music(playlist_id, music_ids)?;
        Ok(json!({ "playlist": playlist }))
    }

    fn handle_remove_music(&self, req: &ActionRequest) -> Result<ActionResponse, ActionError> {
        let playlist_id = req.str_param("playlist_id").unwrap_or_default();
        let music_id = req.str_param("music_id").unwrap_or_default();
        let playlist = self.remove_music(playlist_id, music_id)?;
        Ok(json!({ "playlist": playlist }))
    }

    fn handle_delete(&self, req: &ActionRequest) -> Result<ActionResponse, ActionError> {
        let playlist_id = req.str_param("playlist_id").unwrap_or_default();
        if self.delete(playlist_id) {
            Ok(json!({ "success": true, "message": "playlist deleted" }))
        } else {
            Err(not_found())
        }
    }

    fn handle_update(&self, req: &ActionRequest) -> Result<ActionResponse, ActionError> {
        let playlist_id = req.str_param("playlist_id").unwrap_or_default();
        let description = req.params.get("description").and_then(Value::as_str);
        let playlist = self.update(playlist_id, req.str_param("name"), description)?;
        Ok(json!({ "playlist": playlist }))
    }
}

impl DomainService for PlaylistService {
    fn name(&self) -> &'static str {
        service_names::PLAYLIST
    }

    fn router(self: Arc<Self>) -> ActionRouter {
        let mut router = ActionRouter::new();
        let svc = Arc::clone(&self);
        router.route("create", move |req| svc.handle_create(&req));
        let svc = Arc::clone(&self);
        router.route("get", move |req| svc.handle_get(&req));
        let svc = Arc::clone(&self);
        router.route("list_user_playlists", move |req| {
            Ok(svc.handle_list_user_playlists(&req))
        });
        let svc = Arc::clone(&self);
        router.route("add_music", move |req| svc.handle_add_music(&req));
        let svc = Arc::clone(&self);
        router.route("remove_music", move |req| svc.handle_remove_music(&req));
        let svc = Arc::clone(&self);
        router.route("delete", move |req| svc.handle_delete(&req));
        router.route("update", move |req| self.handle_update(&req));
        router
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
