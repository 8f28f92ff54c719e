//! In-memory store implementations.
//!
//! Selected by the `memory://` DSN. Suitable for single-process deployments
//! and tests; rooms and chat history do not survive a restart.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{ChatMessage, MessageStore, RoomPatch, RoomRecord, RoomStore, StoreError, StoreResult};

/// In-memory room store backed by a concurrent map.
#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: DashMap<String, RoomRecord>,
}

impl MemoryRoomStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create(&self, room: &RoomRecord) -> StoreResult<()> {
        match self.rooms.entry(room.room_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::Conflict(room.room_id.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(room.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, room_id: &str) -> StoreResult<Option<RoomRecord>> {
        Ok(self.rooms.get(room_id).map(|r| r.value().clone()))
    }

    async fn update(&self, room_id: &str, patch: RoomPatch) -> StoreResult<()> {
        match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                room.apply(&patch);
                Ok(())
            }
            None => Err(StoreError::NotFound(room_id.to_string())),
        }
    }
}

/// In-memory append-only message store.
///
/// A single mutex-guarded vector per room is plenty: chat volume is tiny
/// compared to playback traffic, and appends are O(1).
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: DashMap<String, Mutex<Vec<ChatMessage>>>,
}

impl MemoryMessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, msg: &ChatMessage) -> StoreResult<()> {
        self.messages
            .entry(msg.room_id.clone())
            .or_default()
            .lock()
            .push(msg.clone());
        Ok(())
    }

    async fn list(&self, room_id: &str, limit: usize) -> StoreResult<Vec<ChatMessage>> {
        let Some(entry) = self.messages.get(room_id) else {
            return Ok(Vec::new());
        };
        let messages = entry.lock();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages[skip..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_millis;

    fn record(id: &str) -> RoomRecord {
        RoomRecord::new(id.to_string(), "user-1".into(), "Alice".into())
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryRoomStore::new();
        store.create(&record("ABC234")).await.unwrap();

        let fetched = store.get("ABC234").await.unwrap().unwrap();
        assert_eq!(fetched.host_display_name, "Alice");
        assert!(store.get("XYZ789").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let store = MemoryRoomStore::new();
        store.create(&record("ABC234")).await.unwrap();
        assert!(matches!(
            store.create(&record("ABC234")).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_missing_room_is_not_found() {
        let store = MemoryRoomStore::new();
        assert!(matches!(
            store.update("NOPE22", RoomPatch::default()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_applies_patch() {
        let store = MemoryRoomStore::new();
        store.create(&record("ABC234")).await.unwrap();
        store
            .update(
                "ABC234",
                RoomPatch {
                    last_known_time: Some(42.0),
                    last_known_state: Some(crate::store::PlaybackState::Playing),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let fetched = store.get("ABC234").await.unwrap().unwrap();
        assert_eq!(fetched.last_known_time, 42.0);
        assert_eq!(fetched.last_known_state, crate::store::PlaybackState::Playing);
    }

    fn msg(room: &str, body: &str, at: u64) -> ChatMessage {
        ChatMessage {
            room_id: room.to_string(),
            author: "Alice".into(),
            body: body.to_string(),
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn list_returns_chronological_tail() {
        let store = MemoryMessageStore::new();
        let base = now_millis();
        for i in 0..60u64 {
            store
                .append(&msg("ABC234", &format!("m{i}"), base + i))
                .await
                .unwrap();
        }

        let tail = store.list("ABC234", 50).await.unwrap();
        assert_eq!(tail.len(), 50);
        assert_eq!(tail.first().unwrap().body, "m10");
        assert_eq!(tail.last().unwrap().body, "m59");
        assert!(tail.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn list_unknown_room_is_empty() {
        let store = MemoryMessageStore::new();
        assert!(store.list("NOPE22", 50).await.unwrap().is_empty());
    }
}
