//! Play history and per-user listening statistics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};

use super::{now_millis, rank_by_count, DomainService};
use crate::service::action::{service_names, ActionError, ActionRequest, ActionResponse};
use crate::service::router::ActionRouter;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlayRecord {
    pub user_id: String,
    pub music_id: String,
    pub played_at: u64,
}

#[derive(Debug, Clone)]
struct UserEntry {
    total_plays: u64,
    created_at: u64,
}

#[derive(Debug, Default)]
struct UsersState {
    /// Every play, oldest first.
    history: Vec<PlayRecord>,
    users: HashMap<String, UserEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlayCount {
    pub music_id: String,
    pub play_count: usize,
}

fn play_counts<'a>(music_ids: impl IntoIterator<Item = &'a str>, limit: usize) -> Vec<PlayCount> {
    rank_by_count(music_ids, limit)
        .into_iter()
        .map(|(music_id, play_count)| PlayCount {
            music_id: music_id.to_string(),
            play_count,
        })
        .collect()
}

/// Records plays and answers listening-history queries.
#[derive(Debug, Default)]
pub struct UsersService {
    state: Mutex<UsersState>,
}

impl UsersService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a play, registering the user on first sight.
    pub fn play(&self, user_id: &str, music_id: &str) -> PlayRecord {
        let now = now_millis();
        let record = PlayRecord {
            user_id: user_id.to_string(),
            music_id: music_id.to_string(),
            played_at: now,
        };

        let mut state = self.state.lock();
        state.history.push(record.clone());
        state
            .users
            .entry(user_id.to_string())
            .or_insert(UserEntry {
                total_plays: 0,
                created_at: now,
            })
            .total_plays += 1;
        record
    }

    /// The user's plays, newest first.
    #[must_use]
    pub fn history(&self, user_id: &str, limit: usize) -> Vec<PlayRecord> {
        self.state
            .lock()
            .history
            .iter()
            .rev()
            .filter(|record| record.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn most_played(&self, user_id: &str, limit: usize) -> Vec<PlayCount> {
        let state = self.state.lock();
        play_counts(
            state
                .history
                .iter()
                .filter(|record| record.user_id == user_id)
                .map(|record| record.music_id.as_str()),
            limit,
        )
    }

    #[must_use]
    pub fn stats(&self, user_id: &str) -> Option<Value> {
        let state = self.state.lock();
        let user = state.users.get(user_id)?;
        let unique: HashSet<&str> = state
            .history
            .iter()
            .filter(|record| record.user_id == user_id)
            .map(|record| record.music_id.as_str())
            .collect();
        Some(json!({
            "user_id": user_id,
            "total_plays": user.total_plays,
            "unique_songs_played": unique.len(),
            "member_since": user.created_at,
        }))
    }

    /// Plays across all users, newest first.
    #[must_use]
    pub fn recent_plays(&self, limit: usize) -> Vec<PlayRecord> {
        self.state
            .lock()
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn global_most_played(&self, limit: usize) -> Vec<PlayCount> {
        let state = self.state.lock();
        play_counts(
            state.history.iter().map(|record| record.music_id.as_str()),
            limit,
        )
    }

    // -- action handlers ----------------------------------------------------

    fn handle_play(&self, req: &ActionRequest) -> Result<ActionResponse, ActionError> {
        let (Some(user_id), Some(music_id)) =
            (req.str_param("user_id"), req.str_param("music_id"))
        else {
            return Err(ActionError::InvalidParams(
                "user_id and music_id are required".to_string(),
            ));
        };
        let record = self.play(user_id, music_id);
        Ok(json!({ "play_record": record, "success": true }))
    }

    fn handle_get_history(&self, req: &ActionRequest) -> ActionResponse {
        let user_id = req.str_param("user_id").unwrap_or_default();
        let history = self.history(user_id, req.limit_param("limit", 50));
        json!({ "count": history.len(), "history": history })
    }

    fn handle_most_played(&self, req: &ActionRequest) -> ActionResponse {
        let user_id = req.str_param("user_id").unwrap_or_default();
        let ranked = self.most_played(user_id, req.limit_param("limit", 10));
        json!({ "count": ranked.len(), "most_played": ranked })
    }

    fn handle_get_stats(&self, req: &ActionRequest) -> ActionResponse {
        let stats = req
            .str_param("user_id")
            .and_then(|user_id| self.stats(user_id))
            .unwrap_or_else(|| json!({ "error": "user not found" }));
        json!({ "stats": stats })
    }

    fn handle_recent_plays_all(&self, req: &ActionRequest) -> ActionResponse {
        let plays = self.recent_plays(req.limit_param("limit", 20));
        json!({ "count": plays.len(), "recent_plays": plays })
    }

    fn handle_global_most_played(&self, req: &ActionRequest) -> ActionResponse {
        let ranked = self.global_most_played(req.limit_param("limit", 10));
        json!({ "count": ranked.len(), "global_most_played": ranked })
    }
}

impl DomainService for UsersService {
    fn name(&self) -> &'static str {
        service_names::USERS
    }

    fn router(self: Arc<Self>) -> ActionRouter {
        let mut router = ActionRouter::new();
        let svc = Arc::clone(&self);
        router.route("play", move |req| svc.handle_play(&req));
        let svc = Arc::clone(&self);
        router.route("get_history", move |req| Ok(svc.handle_get_history(&req)));
        let svc = Arc::clone(&self);
        router.route("most_played", move |req| Ok(svc.handle_most_played(&req)));
        let svc = Arc::clone(&self);
        router.route("get_stats", move |req| Ok(svc.handle_get_stats(&req)));
        let svc = Arc::clone(&self);
        router.route("recent_plays_all", move |req| {
            Ok(svc.handle_recent_plays_all(&req))
        });
        router.route("global_most_played", move |req| {
            Ok(self.handle_global_most_played(&req))
        });
        router
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
