//! Long-poll fallback transport.
//!
//! For clients that cannot hold a WebSocket open. The session and outbox
//! machinery is shared with the WebSocket path, so the coordinator never
//! knows which transport a session negotiated:
//!
//! - `POST /poll` creates a session and returns its id
//! - `GET /poll/{id}` blocks up to the poll window, then returns queued events
//! - `POST /poll/{id}` submits one client event
//!
//! Sessions that stop polling are reaped by a sweeper, which runs the same
//! disconnect path as a closed socket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::error::{CinesyncError, CinesyncResult};
use crate::room::protocol::{ClientEvent, ServerEvent};
use crate::room::Coordinator;
use crate::session::{SessionGuard, SessionId, SessionRegistry};

/// How long a `GET /poll/{id}` waits for the first event.
const POLL_WINDOW: Duration = Duration::from_secs(25);

/// Idle time after which an unpolled session is presumed dead.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Sweep interval for idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct PollSession {
    guard: SessionGuard,
    /// Exclusive access for the in-flight poll; a second concurrent poll
    /// for the same session is rejected instead of queued.
    outbox: tokio::sync::Mutex<mpsc::Receiver<ServerEvent>>,
    last_seen: parking_lot::Mutex<Instant>,
    connected_at: Instant,
}

/// Long-poll session table.
pub struct PollGateway {
    sessions: DashMap<SessionId, Arc<PollSession>>,
    registry: Arc<SessionRegistry>,
    coordinator: Arc<Coordinator>,
    post_connect_grace: Duration,
}

impl PollGateway {
    /// Creates the gateway. Call [`PollGateway::start_sweeper`] once after
    /// wrapping in an `Arc`.
    pub fn new(
        registry: Arc<SessionRegistry>,
        coordinator: Arc<Coordinator>,
        post_connect_grace: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            registry,
            coordinator,
            post_connect_grace,
        }
    }

    /// Spawns the idle-session sweeper, stopped by `cancel`.
    pub fn start_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => gateway.sweep().await,
                }
            }
        });
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                session.guard.cancel_token().is_cancelled()
                    || now.duration_since(*session.last_seen.lock()) > IDLE_TIMEOUT
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            log::info!("[Poll] reaping idle session {}", id);
            self.remove(&id).await;
        }
    }

    async fn remove(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            self.coordinator.session_closed(session_id).await;
        }
    }

    fn get(&self, session_id: &str) -> Option<Arc<PollSession>> {
        self.sessions.get(session_id).map(|e| Arc::clone(e.value()))
    }

    /// Number of live long-poll sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Response body for `POST /poll`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCreated {
    pub session_id: String,
}

/// `POST /poll`: negotiates a long-poll session.
pub async fn create_poll_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<PollCreated>) {
    let (guard, outbox) = state.poll.registry.register();
    let session_id = guard.id().to_string();
    let now = Instant::now();
    state.poll.sessions.insert(
        session_id.clone(),
        Arc::new(PollSession {
            guard,
            outbox: tokio::sync::Mutex::new(outbox),
            last_seen: parking_lot::Mutex::new(now),
            connected_at: now,
        }),
    );
    log::info!("[Poll] session created: {}", session_id);
    (StatusCode::CREATED, Json(PollCreated { session_id }))
}

/// `GET /poll/{id}`: drains queued events, waiting up to the poll window
/// for the first one.
pub async fn poll_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> CinesyncResult<Json<Vec<ServerEvent>>> {
    let Some(session) = state.poll.get(&session_id) else {
        return Err(CinesyncError::InvalidRequest("unknown session".to_string()));
    };
    if session.guard.cancel_token().is_cancelled() {
        state.poll.remove(&session_id).await;
        return Err(CinesyncError::InvalidRequest("session closed".to_string()));
    }
    *session.last_seen.lock() = Instant::now();

    let Ok(mut outbox) = session.outbox.try_lock() else {
        return Err(CinesyncError::InvalidRequest(
            "poll already in flight".to_string(),
        ));
    };

    let mut events = Vec::new();
    tokio::select! {
        _ = session.guard.cancel_token().cancelled() => {}
        _ = tokio::time::sleep(POLL_WINDOW) => {}
        first = outbox.recv() => {
            if let Some(first) = first {
                events.push(first);
                while let Ok(event) = outbox.try_recv() {
                    events.push(event);
                }
            }
        }
    }

    *session.last_seen.lock() = Instant::now();
    Ok(Json(events))
}

/// `POST /poll/{id}`: submits one client event.
pub async fn submit_poll_event(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(event): Json<ClientEvent>,
) -> CinesyncResult<StatusCode> {
    let Some(session) = state.poll.get(&session_id) else {
        return Err(CinesyncError::InvalidRequest("unknown session".to_string()));
    };
    if session.guard.cancel_token().is_cancelled() {
        state.poll.remove(&session_id).await;
        return Err(CinesyncError::InvalidRequest("session closed".to_string()));
    }
    *session.last_seen.lock() = Instant::now();

    // Same post-connect hold as the WebSocket path.
    if matches!(event, ClientEvent::JoinRoom { .. }) {
        let elapsed = session.connected_at.elapsed();
        if elapsed < state.poll.post_connect_grace {
            tokio::time::sleep(state.poll.post_connect_grace - elapsed).await;
        }
    }

    state.poll.coordinator.dispatch(&session_id, event).await;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitsConfig, SyncConfig};
    use crate::store::{MemoryMessageStore, MemoryRoomStore};

    fn gateway() -> (Arc<PollGateway>, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new(64));
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&registry),
            Arc::new(MemoryRoomStore::new()),
            Arc::new(MemoryMessageStore::new()),
            &LimitsConfig::default(),
            SyncConfig::default(),
            CancellationToken::new(),
        ));
        let gateway = Arc::new(PollGateway::new(
            Arc::clone(&registry),
            coordinator,
            Duration::from_secs(1),
        ));
        (gateway, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_reaps_idle_sessions() {
        let (gateway, registry) = gateway();
        let (guard, outbox) = registry.register();
        let id = guard.id().to_string();
        let now = Instant::now();
        gateway.sessions.insert(
            id.clone(),
            Arc::new(PollSession {
                guard,
                outbox: tokio::sync::Mutex::new(outbox),
                last_seen: parking_lot::Mutex::new(now),
                connected_at: now,
            }),
        );
        assert_eq!(gateway.session_count(), 1);

        // Under paused time the std clock does not advance, so expire the
        // session through its cancel token instead.
        registry.kick(&id);
        gateway.sweep().await;
        assert_eq!(gateway.session_count(), 0);
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn poll_returns_queued_events() {
        let (gateway, registry) = gateway();
        let (guard, outbox) = registry.register();
        let id = guard.id().to_string();
        let now = Instant::now();
        registry.send(&id, ServerEvent::RequestHostTime);
        registry.send(&id, ServerEvent::SyncTime { time: 4.0 });
        gateway.sessions.insert(
            id.clone(),
            Arc::new(PollSession {
                guard,
                outbox: tokio::sync::Mutex::new(outbox),
                last_seen: parking_lot::Mutex::new(now),
                connected_at: now,
            }),
        );

        let session = gateway.get(&id).unwrap();
        let mut outbox = session.outbox.try_lock().unwrap();
        let mut events = Vec::new();
        if let Some(first) = outbox.recv().await {
            events.push(first);
            while let Ok(event) = outbox.try_recv() {
                events.push(event);
            }
        }
        assert_eq!(events.len(), 2);
    }
}
