//! Per-room actor: the authoritative playback state machine.
//!
//! Every room runs one actor task. All mutations flow through its inbox, so
//! state changes are serialized per room and broadcast order matches
//! processing order. Cross-room state is disjoint; rooms never block each
//! other.
//!
//! The actor owns the in-memory [`RoomRecord`], the member roster, the host
//! assignment, and the sync ticker. Store writes are best-effort: failures
//! are logged and in-memory state advances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::room::protocol::{ClientEvent, ServerEvent, UserEntry};
use crate::session::{SessionId, SessionRegistry};
use crate::store::{
    ChatMessage, MessageStore, PlaybackState, RoomPatch, RoomRecord, RoomStore,
};
use crate::utils::now_millis;

/// Maximum chat messages replayed to a joiner.
pub const CHAT_REPLAY_LIMIT: usize = 50;

/// Commands delivered to a room actor through its serialized inbox.
#[derive(Debug)]
pub enum RoomCmd {
    /// A session wants to join (rate limit and post-connect grace already
    /// applied upstream).
    Join {
        session_id: SessionId,
        display_name: String,
    },
    /// Any non-join client event from a session bound to this room.
    Client {
        session_id: SessionId,
        event: ClientEvent,
    },
    /// The session's transport closed.
    Leave { session_id: SessionId },
}

/// Dependencies shared by every room actor.
#[derive(Clone)]
pub(crate) struct RoomDeps {
    pub sessions: Arc<SessionRegistry>,
    pub room_store: Arc<dyn RoomStore>,
    pub message_store: Arc<dyn MessageStore>,
    /// Session -> room bindings, owned by the coordinator. An actor releases
    /// a session's binding when its join is rejected so the session may try
    /// elsewhere.
    pub bindings: Arc<DashMap<SessionId, String>>,
    pub sync: SyncConfig,
    pub cancel: CancellationToken,
}

struct Member {
    display_name: String,
    is_host: bool,
    joined_at: Instant,
}

/// One room's authoritative state and event loop.
pub(crate) struct RoomActor {
    room_id: String,
    deps: RoomDeps,
    inbox: mpsc::Receiver<RoomCmd>,
    record: Option<RoomRecord>,
    /// Whether the record has a row in the store (loads and creates both set
    /// this; a failed create leaves the actor memory-only).
    persisted: bool,
    members: HashMap<SessionId, Member>,
    host: Option<SessionId>,
    /// Set after the first command; an actor that empties out afterwards
    /// shuts down.
    started: bool,
}

impl RoomActor {
    pub(crate) fn new(room_id: String, deps: RoomDeps, inbox: mpsc::Receiver<RoomCmd>) -> Self {
        Self {
            room_id,
            deps,
            inbox,
            record: None,
            persisted: false,
            members: HashMap::new(),
            host: None,
            started: false,
        }
    }

    /// Runs the actor until the room empties or shutdown is signalled.
    pub(crate) async fn run(mut self) {
        let period = Duration::from_secs(self.deps.sync.tick_secs);
        // First tick lands one full period after the first join, not
        // immediately on spawn.
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::debug!("[Room {}] actor started", self.room_id);
        loop {
            tokio::select! {
                _ = self.deps.cancel.cancelled() => {
                    log::info!("[Room {}] shutdown requested", self.room_id);
                    break;
                }
                cmd = self.inbox.recv() => match cmd {
                    Some(cmd) => {
                        self.handle(cmd).await;
                        self.started = true;
                    }
                    None => break,
                },
                _ = ticker.tick() => self.request_host_time(),
            }
            if self.started && self.members.is_empty() {
                log::info!("[Room {}] empty, tearing down", self.room_id);
                break;
            }
        }
        self.flush().await;
    }

    async fn handle(&mut self, cmd: RoomCmd) {
        match cmd {
            RoomCmd::Join {
                session_id,
                display_name,
            } => self.handle_join(session_id, display_name).await,
            RoomCmd::Client { session_id, event } => self.handle_client(session_id, event).await,
            RoomCmd::Leave { session_id } => self.handle_leave(session_id),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Join protocol
    // ─────────────────────────────────────────────────────────────────────

    async fn handle_join(&mut self, session_id: SessionId, display_name: String) {
        // Reap members whose transport died without a Leave reaching us, so
        // a stale binding never blocks a legitimate reconnect.
        self.reap_stale();

        // Re-join from the same session is a no-op.
        if self.members.contains_key(&session_id) {
            log::debug!("[Room {}] {} re-joined, ignoring", self.room_id, session_id);
            return;
        }

        // The display name may only be bound to one live session per room.
        if self
            .members
            .values()
            .any(|m| m.display_name == display_name)
        {
            log::warn!(
                "[Room {}] duplicate session for '{}', rejecting {}",
                self.room_id,
                display_name,
                session_id
            );
            self.send_to(
                &session_id,
                ServerEvent::Error {
                    message: "Already connected".to_string(),
                },
            );
            self.release_binding(&session_id);
            return;
        }

        let created_now = self.ensure_record(&display_name).await;

        // Host determination: creator, then reclaim by display name, then
        // fallback when the room has no live host.
        let reclaim = self
            .record
            .as_ref()
            .is_some_and(|r| r.host_display_name == display_name);
        let no_live_host = self
            .host
            .as_ref()
            .map_or(true, |h| !self.members.contains_key(h));
        let is_host = created_now || reclaim || no_live_host;

        if is_host {
            // Demote the previous host (reclaim path); the refreshed roster
            // below announces the change.
            if let Some(prev) = self.host.take() {
                if let Some(member) = self.members.get_mut(&prev) {
                    member.is_host = false;
                }
            }
            self.host = Some(session_id.clone());
        }

        self.members.insert(
            session_id.clone(),
            Member {
                display_name: display_name.clone(),
                is_host,
                joined_at: Instant::now(),
            },
        );
        log::info!(
            "[Room {}] {} joined as '{}'{}",
            self.room_id,
            session_id,
            display_name,
            if is_host { " (host)" } else { "" }
        );

        // Role strictly before state, with a gap so the client has applied
        // its role before the snapshot lands. The actor is serialized per
        // room, so sleeping here cannot reorder this room's events.
        self.send_to(&session_id, ServerEvent::HostAssigned { is_host });
        tokio::time::sleep(Duration::from_millis(self.deps.sync.event_order_delay_ms)).await;
        self.send_to(&session_id, self.sync_state_event());

        // Resync every member when a video is loaded, so the joiner starts
        // from the host clock rather than zero.
        let snapshot = self.record.as_ref().map(|r| {
            (
                r.current_video_url.is_some(),
                r.last_known_time,
                r.last_known_state,
            )
        });
        if let Some((true, time, state)) = snapshot {
            self.broadcast_all(ServerEvent::SyncTime { time });
            match state {
                PlaybackState::Playing => self.broadcast_all(ServerEvent::Play { time }),
                PlaybackState::Paused => self.broadcast_all(ServerEvent::Pause { time }),
            }
        }

        self.broadcast_others(&session_id, ServerEvent::UserJoined { display_name });
        self.broadcast_all(self.roster_event());

        // Chat replay, best-effort: a degraded store costs history, not sync.
        match self
            .deps
            .message_store
            .list(&self.room_id, CHAT_REPLAY_LIMIT)
            .await
        {
            Ok(messages) => {
                for msg in messages {
                    self.send_to(
                        &session_id,
                        ServerEvent::NewChatMessage {
                            author: msg.author,
                            body: msg.body,
                            timestamp: msg.timestamp,
                        },
                    );
                }
            }
            Err(e) => log::warn!("[Room {}] chat replay unavailable: {}", self.room_id, e),
        }
    }

    /// Loads or creates the persisted room row. Returns whether this call
    /// created the record (which makes the joiner the host).
    async fn ensure_record(&mut self, joiner: &str) -> bool {
        if self.record.is_some() {
            return false;
        }
        match self.deps.room_store.get(&self.room_id).await {
            Ok(Some(record)) => {
                self.record = Some(record);
                self.persisted = true;
                false
            }
            Ok(None) => {
                let record = RoomRecord::new(
                    self.room_id.clone(),
                    Uuid::new_v4().to_string(),
                    joiner.to_string(),
                );
                match self.deps.room_store.create(&record).await {
                    Ok(()) => self.persisted = true,
                    Err(e) => log::warn!(
                        "[Room {}] store create failed, continuing in-memory: {}",
                        self.room_id,
                        e
                    ),
                }
                self.record = Some(record);
                true
            }
            Err(e) => {
                log::warn!(
                    "[Room {}] store unavailable, continuing in-memory: {}",
                    self.room_id,
                    e
                );
                self.record = Some(RoomRecord::new(
                    self.room_id.clone(),
                    Uuid::new_v4().to_string(),
                    joiner.to_string(),
                ));
                true
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Client events
    // ─────────────────────────────────────────────────────────────────────

    async fn handle_client(&mut self, session_id: SessionId, event: ClientEvent) {
        if !self.members.contains_key(&session_id) {
            // Chat from a non-member gets a nudge; everything else is noise
            // from a session that never completed its join.
            if matches!(event, ClientEvent::ChatMessage { .. }) {
                self.send_to(
                    &session_id,
                    ServerEvent::Error {
                        message: "Join a room first".to_string(),
                    },
                );
            }
            return;
        }

        // Host events from non-hosts are dropped without a reply so a
        // replayed event cannot probe role state.
        if event.is_host_only() && self.host.as_deref() != Some(session_id.as_str()) {
            log::trace!(
                "[Room {}] dropping {} from non-host {}",
                self.room_id,
                event.name(),
                session_id
            );
            return;
        }

        match event {
            ClientEvent::HostPlay { time } => {
                let time = time.max(0.0);
                self.apply_record(RoomPatch {
                    last_known_time: Some(time),
                    last_known_state: Some(PlaybackState::Playing),
                    ..Default::default()
                })
                .await;
                self.broadcast_others(&session_id, ServerEvent::Play { time });
            }
            ClientEvent::HostPause { time } => {
                let time = time.max(0.0);
                self.apply_record(RoomPatch {
                    last_known_time: Some(time),
                    last_known_state: Some(PlaybackState::Paused),
                    ..Default::default()
                })
                .await;
                self.broadcast_others(&session_id, ServerEvent::Pause { time });
            }
            ClientEvent::HostSeek { time } => {
                let time = time.max(0.0);
                self.apply_record(RoomPatch {
                    last_known_time: Some(time),
                    ..Default::default()
                })
                .await;
                self.broadcast_others(&session_id, ServerEvent::Seek { time });
            }
            ClientEvent::HostChangeVideo { url, title } => {
                // An empty url clears the video.
                let url = if url.trim().is_empty() { None } else { Some(url) };
                let title = url.as_ref().and(title);
                self.apply_record(RoomPatch {
                    current_video_url: Some(url.clone()),
                    current_video_title: Some(title.clone()),
                    last_known_time: Some(0.0),
                    last_known_state: Some(PlaybackState::Paused),
                })
                .await;
                self.broadcast_all(ServerEvent::ChangeVideo { url, title });
            }
            ClientEvent::HostReportTime { time } => {
                // Broadcast to every member, host included: the host applies
                // its own clock idempotently.
                self.broadcast_all(ServerEvent::SyncTime { time: time.max(0.0) });
            }
            ClientEvent::RequestSync => {
                self.send_to(&session_id, self.sync_state_event());
            }
            ClientEvent::RequestUserList => {
                self.send_to(&session_id, self.roster_event());
            }
            ClientEvent::ChatMessage { body } => {
                let body = body.trim().to_string();
                if body.is_empty() {
                    return;
                }
                let author = self.members[&session_id].display_name.clone();
                let msg = ChatMessage {
                    room_id: self.room_id.clone(),
                    author: author.clone(),
                    body: body.clone(),
                    timestamp: now_millis(),
                };
                self.broadcast_all(ServerEvent::NewChatMessage {
                    author,
                    body,
                    timestamp: msg.timestamp,
                });
                if let Err(e) = self.deps.message_store.append(&msg).await {
                    log::warn!("[Room {}] chat persist failed: {}", self.room_id, e);
                }
            }
            ClientEvent::JoinRoom { .. } => {
                // Joins are routed through RoomCmd::Join by the coordinator.
                log::debug!("[Room {}] stray join-room in client path", self.room_id);
            }
        }
    }

    /// Advances the in-memory record, then mirrors the change to the store.
    /// The store is best-effort; a failure costs durability, not liveness.
    async fn apply_record(&mut self, patch: RoomPatch) {
        if let Some(record) = self.record.as_mut() {
            record.apply(&patch);
        }
        if self.persisted {
            if let Err(e) = self.deps.room_store.update(&self.room_id, patch).await {
                log::warn!("[Room {}] store update failed: {}", self.room_id, e);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Membership churn
    // ─────────────────────────────────────────────────────────────────────

    fn handle_leave(&mut self, session_id: SessionId) {
        let Some(member) = self.members.remove(&session_id) else {
            return;
        };
        log::info!(
            "[Room {}] '{}' left ({})",
            self.room_id,
            member.display_name,
            session_id
        );

        let was_host = self.host.as_deref() == Some(session_id.as_str());
        if was_host {
            self.host = None;
        }

        if self.members.is_empty() {
            // The run loop tears the actor down after this command; the
            // persisted row remains so the creator can reclaim the room.
            return;
        }

        if was_host {
            self.promote_successor();
        }
        self.broadcast_all(ServerEvent::UserLeft {
            display_name: member.display_name,
        });
        self.broadcast_all(self.roster_event());
    }

    /// Promotes the longest-lived member to host.
    fn promote_successor(&mut self) {
        let Some(next) = self
            .members
            .iter()
            .min_by_key(|(_, m)| m.joined_at)
            .map(|(id, _)| id.clone())
        else {
            return;
        };
        if let Some(member) = self.members.get_mut(&next) {
            member.is_host = true;
        }
        log::info!("[Room {}] host succession -> {}", self.room_id, next);
        self.host = Some(next.clone());
        self.send_to(&next, ServerEvent::HostAssigned { is_host: true });
    }

    /// Removes members whose transports are gone. Their departure events are
    /// emitted as if a Leave had arrived.
    fn reap_stale(&mut self) {
        let stale: Vec<SessionId> = self
            .members
            .keys()
            .filter(|id| !self.deps.sessions.is_live(id))
            .cloned()
            .collect();
        for id in stale {
            log::debug!("[Room {}] reaping stale session {}", self.room_id, id);
            self.handle_leave(id);
        }
    }

    fn release_binding(&self, session_id: &str) {
        self.deps
            .bindings
            .remove_if(session_id, |_, room| room == &self.room_id);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sync ticker
    // ─────────────────────────────────────────────────────────────────────

    /// Asks the live host to report its clock; the reply is broadcast as
    /// `server:sync-time` through the normal event path.
    fn request_host_time(&self) {
        if let Some(host) = &self.host {
            if self.members.contains_key(host) {
                self.send_to(host, ServerEvent::RequestHostTime);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event helpers
    // ─────────────────────────────────────────────────────────────────────

    fn sync_state_event(&self) -> ServerEvent {
        let (url, title, time, state) = match &self.record {
            Some(r) => (
                r.current_video_url.clone(),
                r.current_video_title.clone(),
                r.last_known_time,
                r.last_known_state,
            ),
            None => (None, None, 0.0, PlaybackState::Paused),
        };
        ServerEvent::SyncState {
            url,
            title,
            time,
            state,
            drift_threshold: self.deps.sync.drift_threshold_secs,
        }
    }

    fn roster_event(&self) -> ServerEvent {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.joined_at);
        ServerEvent::UserListUpdated {
            users: members
                .into_iter()
                .map(|m| UserEntry {
                    display_name: m.display_name.clone(),
                    is_host: m.is_host,
                })
                .collect(),
        }
    }

    fn send_to(&self, session_id: &str, event: ServerEvent) {
        // Dropped and Closed both resolve through the session's own cleanup.
        let _ = self.deps.sessions.send(session_id, event);
    }

    fn broadcast_all(&self, event: ServerEvent) {
        for id in self.members.keys() {
            self.send_to(id, event.clone());
        }
    }

    fn broadcast_others(&self, except: &str, event: ServerEvent) {
        for id in self.members.keys().filter(|id| id.as_str() != except) {
            self.send_to(id, event.clone());
        }
    }

    /// Final best-effort store flush on teardown.
    async fn flush(&mut self) {
        let Some(record) = &self.record else { return };
        if !self.persisted {
            return;
        }
        let patch = RoomPatch {
            current_video_url: Some(record.current_video_url.clone()),
            current_video_title: Some(record.current_video_title.clone()),
            last_known_time: Some(record.last_known_time),
            last_known_state: Some(record.last_known_state),
        };
        if let Err(e) = self.deps.room_store.update(&self.room_id, patch).await {
            log::warn!("[Room {}] final flush failed: {}", self.room_id, e);
        }
        log::debug!("[Room {}] actor stopped", self.room_id);
    }
}
