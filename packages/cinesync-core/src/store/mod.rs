//! Durable persistence interfaces for rooms and chat history.
//!
//! The coordinator treats every store call as best-effort: a failure is
//! logged and in-memory state advances. The store exists for durability and
//! cross-restart host reclaim, never as the live source of truth.

mod memory;

pub use memory::{MemoryMessageStore, MemoryRoomStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::now_millis;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store is unreachable or timed out.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint was violated (duplicate room id).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Playback state of a room's current video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    #[default]
    Paused,
}

/// Persisted room record.
///
/// `host_user_id` and `host_display_name` identify the creator and survive
/// reconnects; the live host of the in-memory room may differ after
/// succession.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub room_id: String,
    pub host_user_id: String,
    pub host_display_name: String,
    pub current_video_url: Option<String>,
    pub current_video_title: Option<String>,
    /// Seconds into the current video, always >= 0.
    pub last_known_time: f64,
    pub last_known_state: PlaybackState,
    /// Unix millis.
    pub created_at: u64,
    /// Unix millis, always >= `created_at`.
    pub updated_at: u64,
}

impl RoomRecord {
    /// Creates a fresh record with no video loaded.
    #[must_use]
    pub fn new(room_id: String, host_user_id: String, host_display_name: String) -> Self {
        let now = now_millis();
        Self {
            room_id,
            host_user_id,
            host_display_name,
            current_video_url: None,
            current_video_title: None,
            last_known_time: 0.0,
            last_known_state: PlaybackState::Paused,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a patch in place, bumping `updated_at`.
    pub fn apply(&mut self, patch: &RoomPatch) {
        if let Some(url) = &patch.current_video_url {
            self.current_video_url = url.clone();
        }
        if let Some(title) = &patch.current_video_title {
            self.current_video_title = title.clone();
        }
        if let Some(time) = patch.last_known_time {
            self.last_known_time = time.max(0.0);
        }
        if let Some(state) = patch.last_known_state {
            self.last_known_state = state;
        }
        self.updated_at = now_millis().max(self.created_at);
    }
}

/// Partial update for a room record. `None` fields are left untouched;
/// the nested `Option` on video fields distinguishes "unchanged" from
/// "cleared".
#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub current_video_url: Option<Option<String>>,
    pub current_video_title: Option<Option<String>>,
    pub last_known_time: Option<f64>,
    pub last_known_state: Option<PlaybackState>,
}

/// A single chat message. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: String,
    pub author: String,
    pub body: String,
    /// Unix millis.
    pub timestamp: u64,
}

/// Durable storage for room records.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Inserts a new room. Fails with [`StoreError::Conflict`] when the id
    /// already exists.
    async fn create(&self, room: &RoomRecord) -> StoreResult<()>;

    /// Fetches a room by id.
    async fn get(&self, room_id: &str) -> StoreResult<Option<RoomRecord>>;

    /// Applies a partial update. Missing rooms are an error so callers can
    /// distinguish a lost row from a write failure.
    async fn update(&self, room_id: &str, patch: RoomPatch) -> StoreResult<()>;
}

/// Durable storage for chat history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends a message.
    async fn append(&self, msg: &ChatMessage) -> StoreResult<()>;

    /// Lists up to `limit` most recent messages for a room, returned in
    /// chronological order.
    async fn list(&self, room_id: &str, limit: usize) -> StoreResult<Vec<ChatMessage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_invariants() {
        let record = RoomRecord::new("ABC234".into(), "user-1".into(), "Alice".into());
        assert_eq!(record.last_known_time, 0.0);
        assert_eq!(record.last_known_state, PlaybackState::Paused);
        assert!(record.updated_at >= record.created_at);
        assert!(record.current_video_url.is_none());
    }

    #[test]
    fn apply_clamps_negative_time() {
        let mut record = RoomRecord::new("ABC234".into(), "user-1".into(), "Alice".into());
        record.apply(&RoomPatch {
            last_known_time: Some(-5.0),
            ..Default::default()
        });
        assert_eq!(record.last_known_time, 0.0);
    }

    #[test]
    fn apply_distinguishes_clear_from_unchanged() {
        let mut record = RoomRecord::new("ABC234".into(), "user-1".into(), "Alice".into());
        record.apply(&RoomPatch {
            current_video_url: Some(Some("u".into())),
            current_video_title: Some(Some("t".into())),
            ..Default::default()
        });
        assert_eq!(record.current_video_url.as_deref(), Some("u"));

        // Patch that does not mention the video leaves it alone
        record.apply(&RoomPatch {
            last_known_time: Some(3.0),
            ..Default::default()
        });
        assert_eq!(record.current_video_url.as_deref(), Some("u"));

        // Explicit clear
        record.apply(&RoomPatch {
            current_video_url: Some(None),
            current_video_title: Some(None),
            ..Default::default()
        });
        assert!(record.current_video_url.is_none());
        assert!(record.current_video_title.is_none());
    }

    #[test]
    fn playback_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PlaybackState::Playing).unwrap(),
            "\"playing\""
        );
        assert_eq!(
            serde_json::to_string(&PlaybackState::Paused).unwrap(),
            "\"paused\""
        );
    }
}
