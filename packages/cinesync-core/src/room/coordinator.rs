//! Room registry and event dispatch.
//!
//! The coordinator is the single entry point for everything the gateway
//! hears from a session. It enforces the join rate limit, tracks which room
//! each session is bound to, spawns one [`RoomActor`](super::actor::RoomActor)
//! per live room, and routes commands into the right actor's serialized
//! inbox. Rooms are isolated: a fault in one never touches another.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{LimitsConfig, SyncConfig};
use crate::error::{CinesyncError, CinesyncResult};
use crate::room::actor::{RoomActor, RoomCmd, RoomDeps, CHAT_REPLAY_LIMIT};
use crate::room::protocol::{ClientEvent, ServerEvent};
use crate::room::rate_limit::JoinRateLimiter;
use crate::session::{SessionId, SessionRegistry};
use crate::store::{ChatMessage, MessageStore, RoomRecord, RoomStore, StoreError};
use crate::utils::{generate_room_id, normalize_display_name};

/// Capacity of each room actor's inbox. Dispatch suspends when a room is
/// this far behind, which back-pressures the offending transports.
const ROOM_INBOX_CAPACITY: usize = 256;

/// Attempts to mint an unused room id before giving up.
const ROOM_ID_ATTEMPTS: usize = 8;

struct RoomHandle {
    inbox: mpsc::Sender<RoomCmd>,
}

/// Authoritative coordinator over all active rooms.
pub struct Coordinator {
    rooms: Arc<DashMap<String, RoomHandle>>,
    /// Which room each session joined. Set on dispatching a join, released
    /// by the actor when the join is rejected, and cleared on disconnect.
    bindings: Arc<DashMap<SessionId, String>>,
    limiter: JoinRateLimiter,
    sessions: Arc<SessionRegistry>,
    room_store: Arc<dyn RoomStore>,
    message_store: Arc<dyn MessageStore>,
    sync: SyncConfig,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Creates a coordinator wired to the given stores and session registry.
    ///
    /// `cancel` is the shutdown token: cancelling it stops every room actor
    /// after a final store flush.
    pub fn new(
        sessions: Arc<SessionRegistry>,
        room_store: Arc<dyn RoomStore>,
        message_store: Arc<dyn MessageStore>,
        limits: &LimitsConfig,
        sync: SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            bindings: Arc::new(DashMap::new()),
            limiter: JoinRateLimiter::new(
                Duration::from_secs(limits.join_window_secs),
                limits.join_max_attempts,
            ),
            sessions,
            room_store,
            message_store,
            sync,
            cancel,
        }
    }

    /// Number of rooms with a live actor.
    #[must_use]
    pub fn active_room_count(&self) -> usize {
        self.rooms.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Gateway entry points
    // ─────────────────────────────────────────────────────────────────────

    /// Routes one client event. Called by gateway transports after decoding;
    /// the post-connect join grace has already been applied there.
    pub async fn dispatch(&self, session_id: &str, event: ClientEvent) {
        tracing::debug!(session = session_id, event = event.name(), "dispatch");
        match event {
            ClientEvent::JoinRoom {
                room_id,
                display_name,
            } => self.dispatch_join(session_id, room_id, display_name).await,
            other => self.dispatch_client(session_id, other).await,
        }
    }

    async fn dispatch_join(&self, session_id: &str, room_id: String, display_name: String) {
        let Some(display_name) = normalize_display_name(&display_name) else {
            self.reply_error(session_id, "Invalid display name");
            return;
        };
        if room_id.is_empty() || room_id.len() > 64 {
            self.reply_error(session_id, "Invalid room id");
            return;
        }

        if !self.limiter.check(session_id) {
            log::warn!(
                "[Coordinator] join rate limit hit for session {}",
                session_id
            );
            self.reply_error(session_id, "Too many join attempts. Please wait.");
            return;
        }

        if let Some(bound) = self.bindings.get(session_id) {
            if *bound != room_id {
                // A session belongs to at most one room for its lifetime.
                log::debug!(
                    "[Coordinator] session {} already bound to {}, ignoring join to {}",
                    session_id,
                    *bound,
                    room_id
                );
                return;
            }
        } else {
            self.bindings
                .insert(session_id.to_string(), room_id.clone());
        }

        self.send_room(
            &room_id,
            RoomCmd::Join {
                session_id: session_id.to_string(),
                display_name,
            },
        )
        .await;
    }

    async fn dispatch_client(&self, session_id: &str, event: ClientEvent) {
        let Some(room_id) = self.bindings.get(session_id).map(|r| r.value().clone()) else {
            if matches!(event, ClientEvent::ChatMessage { .. }) {
                self.reply_error(session_id, "Join a room first");
            } else {
                log::trace!(
                    "[Coordinator] dropping {} from unbound session {}",
                    event.name(),
                    session_id
                );
            }
            return;
        };

        let Some(inbox) = self.live_room_inbox(&room_id) else {
            // Room emptied out from under a stale binding.
            log::debug!(
                "[Coordinator] room {} gone, dropping {} from {}",
                room_id,
                event.name(),
                session_id
            );
            self.bindings.remove(session_id);
            return;
        };
        if inbox
            .send(RoomCmd::Client {
                session_id: session_id.to_string(),
                event,
            })
            .await
            .is_err()
        {
            log::debug!("[Coordinator] room {} closed mid-dispatch", room_id);
        }
    }

    /// Runs disconnect cleanup for a session whose transport closed.
    pub async fn session_closed(&self, session_id: &str) {
        self.limiter.forget(session_id);
        let Some((_, room_id)) = self.bindings.remove(session_id) else {
            return;
        };
        if let Some(inbox) = self.live_room_inbox(&room_id) {
            let _ = inbox
                .send(RoomCmd::Leave {
                    session_id: session_id.to_string(),
                })
                .await;
        }
    }

    fn reply_error(&self, session_id: &str, message: &str) {
        let _ = self.sessions.send(
            session_id,
            ServerEvent::Error {
                message: message.to_string(),
            },
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // Room actor lifecycle
    // ─────────────────────────────────────────────────────────────────────

    fn live_room_inbox(&self, room_id: &str) -> Option<mpsc::Sender<RoomCmd>> {
        self.rooms
            .get(room_id)
            .filter(|h| !h.inbox.is_closed())
            .map(|h| h.inbox.clone())
    }

    /// Returns the room's inbox, spawning a fresh actor when none is live.
    fn room_inbox(&self, room_id: &str) -> mpsc::Sender<RoomCmd> {
        use dashmap::mapref::entry::Entry;

        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().inbox.is_closed() {
                    return occupied.get().inbox.clone();
                }
                let inbox = self.spawn_actor(room_id);
                occupied.insert(RoomHandle {
                    inbox: inbox.clone(),
                });
                inbox
            }
            Entry::Vacant(vacant) => {
                let inbox = self.spawn_actor(room_id);
                vacant.insert(RoomHandle {
                    inbox: inbox.clone(),
                });
                inbox
            }
        }
    }

    fn spawn_actor(&self, room_id: &str) -> mpsc::Sender<RoomCmd> {
        let (tx, rx) = mpsc::channel(ROOM_INBOX_CAPACITY);
        let deps = RoomDeps {
            sessions: Arc::clone(&self.sessions),
            room_store: Arc::clone(&self.room_store),
            message_store: Arc::clone(&self.message_store),
            bindings: Arc::clone(&self.bindings),
            sync: self.sync.clone(),
            cancel: self.cancel.child_token(),
        };
        let actor = RoomActor::new(room_id.to_string(), deps, rx);
        let rooms = Arc::clone(&self.rooms);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            actor.run().await;
            // Drop the registry entry unless a newer actor already replaced it.
            rooms.remove_if(&room_id, |_, handle| handle.inbox.is_closed());
        });
        tx
    }

    /// Sends a command to a room, respawning its actor once if it shut down
    /// between lookup and send.
    async fn send_room(&self, room_id: &str, cmd: RoomCmd) {
        let mut cmd = Some(cmd);
        for _ in 0..2 {
            let inbox = self.room_inbox(room_id);
            match inbox.send(cmd.take().expect("command consumed twice")).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => cmd = Some(returned),
            }
        }
        log::warn!("[Coordinator] room {} unreachable, command dropped", room_id);
    }

    // ─────────────────────────────────────────────────────────────────────
    // REST surface
    // ─────────────────────────────────────────────────────────────────────

    /// Creates a room row with a freshly minted shareable id.
    pub async fn create_room(
        &self,
        name: Option<String>,
        host: Option<String>,
    ) -> CinesyncResult<RoomRecord> {
        let host_display_name = host
            .as_deref()
            .and_then(normalize_display_name)
            .unwrap_or_else(|| "Host".to_string());
        let _ = name; // Room naming is a UI affordance; the record keys by id.

        for _ in 0..ROOM_ID_ATTEMPTS {
            let record = RoomRecord::new(
                generate_room_id(),
                Uuid::new_v4().to_string(),
                host_display_name.clone(),
            );
            match self.room_store.create(&record).await {
                Ok(()) => {
                    log::info!("[Coordinator] created room {}", record.room_id);
                    return Ok(record);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CinesyncError::Internal(
            "could not allocate a unique room id".to_string(),
        ))
    }

    /// Fetches a room projection for the REST surface.
    pub async fn get_room(&self, room_id: &str) -> CinesyncResult<RoomRecord> {
        match self.room_store.get(room_id).await? {
            Some(record) => Ok(record),
            None => Err(CinesyncError::RoomNotFound(room_id.to_string())),
        }
    }

    /// Lists chat history, capped at the join-replay limit.
    pub async fn messages(
        &self,
        room_id: &str,
        limit: Option<usize>,
    ) -> CinesyncResult<Vec<ChatMessage>> {
        let limit = limit.unwrap_or(CHAT_REPLAY_LIMIT).min(CHAT_REPLAY_LIMIT);
        Ok(self.message_store.list(room_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryMessageStore, MemoryRoomStore, PlaybackState};
    use tokio::sync::mpsc::Receiver;

    struct Harness {
        coordinator: Arc<Coordinator>,
        registry: Arc<SessionRegistry>,
        room_store: Arc<MemoryRoomStore>,
        cancel: CancellationToken,
    }

    fn harness() -> Harness {
        let registry = Arc::new(SessionRegistry::new(64));
        let room_store = Arc::new(MemoryRoomStore::new());
        let message_store = Arc::new(MemoryMessageStore::new());
        let cancel = CancellationToken::new();
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&registry),
            Arc::clone(&room_store) as Arc<dyn RoomStore>,
            message_store as Arc<dyn MessageStore>,
            &LimitsConfig::default(),
            SyncConfig::default(),
            cancel.clone(),
        ));
        Harness {
            coordinator,
            registry,
            room_store,
            cancel,
        }
    }

    async fn next_event(rx: &mut Receiver<ServerEvent>) -> ServerEvent {
        loop {
            match rx.recv().await.expect("event stream ended") {
                ServerEvent::RequestHostTime => continue,
                other => return other,
            }
        }
    }

    fn join(room: &str, name: &str) -> ClientEvent {
        ClientEvent::JoinRoom {
            room_id: room.to_string(),
            display_name: name.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn join_play_round_trip_through_dispatch() {
        let h = harness();
        let (alice, mut alice_rx) = h.registry.register();
        let (bob, mut bob_rx) = h.registry.register();

        h.coordinator.dispatch(alice.id(), join("ABC234", "Alice")).await;
        for _ in 0..3 {
            next_event(&mut alice_rx).await;
        }
        h.coordinator.dispatch(bob.id(), join("ABC234", "Bob")).await;
        for _ in 0..3 {
            next_event(&mut bob_rx).await;
        }

        h.coordinator
            .dispatch(alice.id(), ClientEvent::HostPlay { time: 5.0 })
            .await;
        assert!(matches!(
            next_event(&mut bob_rx).await,
            ServerEvent::Play { time } if time == 5.0
        ));
        assert_eq!(h.coordinator.active_room_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_join_in_window_is_rate_limited() {
        let h = harness();
        let (alice, mut alice_rx) = h.registry.register();

        // Five attempts pass (re-joins are no-ops beyond the first).
        for _ in 0..5 {
            h.coordinator.dispatch(alice.id(), join("ABC234", "Alice")).await;
        }
        for _ in 0..3 {
            next_event(&mut alice_rx).await;
        }

        h.coordinator.dispatch(alice.id(), join("ABC234", "Alice")).await;
        assert!(matches!(
            next_event(&mut alice_rx).await,
            ServerEvent::Error { ref message } if message == "Too many join attempts. Please wait."
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn join_to_second_room_is_ignored() {
        let h = harness();
        let (alice, mut alice_rx) = h.registry.register();

        h.coordinator.dispatch(alice.id(), join("ABC234", "Alice")).await;
        for _ in 0..3 {
            next_event(&mut alice_rx).await;
        }
        h.coordinator.dispatch(alice.id(), join("XYZ789", "Alice")).await;

        // Only the first room has an actor; the session stays bound to it.
        assert_eq!(h.coordinator.active_room_count(), 1);
        h.coordinator
            .dispatch(alice.id(), ClientEvent::RequestSync)
            .await;
        assert!(matches!(
            next_event(&mut alice_rx).await,
            ServerEvent::SyncState { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn chat_without_join_gets_error() {
        let h = harness();
        let (alice, mut alice_rx) = h.registry.register();

        h.coordinator
            .dispatch(alice.id(), ClientEvent::ChatMessage { body: "hi".into() })
            .await;
        assert!(matches!(
            next_event(&mut alice_rx).await,
            ServerEvent::Error { ref message } if message == "Join a room first"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_promotes_successor() {
        let h = harness();
        let (alice, mut alice_rx) = h.registry.register();
        let (bob, mut bob_rx) = h.registry.register();

        h.coordinator.dispatch(alice.id(), join("ABC234", "Alice")).await;
        for _ in 0..3 {
            next_event(&mut alice_rx).await;
        }
        h.coordinator.dispatch(bob.id(), join("ABC234", "Bob")).await;
        for _ in 0..3 {
            next_event(&mut bob_rx).await;
        }

        h.coordinator.session_closed(alice.id()).await;
        assert!(matches!(
            next_event(&mut bob_rx).await,
            ServerEvent::HostAssigned { is_host: true }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn room_actor_is_respawned_after_teardown() {
        let h = harness();
        let (alice, mut alice_rx) = h.registry.register();

        h.coordinator.dispatch(alice.id(), join("ABC234", "Alice")).await;
        for _ in 0..3 {
            next_event(&mut alice_rx).await;
        }
        h.coordinator.session_closed(alice.id()).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.coordinator.active_room_count(), 0);

        // Rejoining revives the room from its persisted row.
        let (alice2, mut alice2_rx) = h.registry.register();
        h.coordinator.dispatch(alice2.id(), join("ABC234", "Alice")).await;
        assert!(matches!(
            next_event(&mut alice2_rx).await,
            ServerEvent::HostAssigned { is_host: true }
        ));
        assert_eq!(h.coordinator.active_room_count(), 1);
    }

    #[tokio::test]
    async fn create_room_mints_unique_ids() {
        let h = harness();
        let a = h.coordinator.create_room(None, Some("Alice".into())).await.unwrap();
        let b = h.coordinator.create_room(None, None).await.unwrap();

        assert_ne!(a.room_id, b.room_id);
        assert_eq!(a.host_display_name, "Alice");
        assert_eq!(b.host_display_name, "Host");
        assert_eq!(a.last_known_state, PlaybackState::Paused);
        assert_eq!(h.room_store.room_count(), 2);
    }

    #[tokio::test]
    async fn get_room_distinguishes_missing() {
        let h = harness();
        let created = h.coordinator.create_room(None, None).await.unwrap();
        assert!(h.coordinator.get_room(&created.room_id).await.is_ok());
        assert!(matches!(
            h.coordinator.get_room("NOPE22").await,
            Err(CinesyncError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn message_limit_is_capped_at_replay_limit() {
        let h = harness();
        // The cap applies even when the client asks for more.
        let messages = h.coordinator.messages("ABC234", Some(500)).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_actors() {
        let h = harness();
        let (alice, mut alice_rx) = h.registry.register();
        h.coordinator.dispatch(alice.id(), join("ABC234", "Alice")).await;
        for _ in 0..3 {
            next_event(&mut alice_rx).await;
        }

        h.cancel.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.coordinator.active_room_count(), 0);
    }
}
