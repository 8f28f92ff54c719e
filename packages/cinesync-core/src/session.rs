//! Session tracking shared by every gateway transport.
//!
//! A session is one client connection, WebSocket or long-poll. The registry
//! assigns opaque ids, owns each session's bounded outbox sender, and
//! supports force-close (per session on overflow, global on shutdown).
//!
//! Outbox policy: enqueues never block. A session whose outbox is full is
//! cancelled on the spot so one slow consumer cannot stall a room actor.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::room::protocol::ServerEvent;

/// Opaque gateway-assigned session identifier.
pub type SessionId = String;

/// Outcome of an outbox enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Event queued for delivery.
    Queued,
    /// Outbox full; the session was cancelled.
    Dropped,
    /// Session already gone (transport closed or never existed).
    Closed,
}

struct SessionEntry {
    outbox: mpsc::Sender<ServerEvent>,
    connected_at: Instant,
    cancel: CancellationToken,
}

/// Registry of live gateway sessions.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
    /// Global cancellation token - when cancelled, all sessions close.
    /// Wrapped in RwLock so it can be replaced after close_all().
    global_cancel: RwLock<CancellationToken>,
    outbox_capacity: usize,
}

impl SessionRegistry {
    /// Creates a registry whose outboxes hold `outbox_capacity` events.
    #[must_use]
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            global_cancel: RwLock::new(CancellationToken::new()),
            outbox_capacity,
        }
    }

    /// Registers a new session.
    ///
    /// Returns the RAII guard (unregisters on drop) and the outbox receiver
    /// the transport must drain. Dropping the receiver marks the session
    /// stale; the registry entry itself is removed by the guard.
    pub fn register(self: &Arc<Self>) -> (SessionGuard, mpsc::Receiver<ServerEvent>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        let cancel = self.global_cancel.read().child_token();
        let connected_at = Instant::now();

        self.sessions.insert(
            id.clone(),
            SessionEntry {
                outbox: tx,
                connected_at,
                cancel: cancel.clone(),
            },
        );
        log::info!(
            "[Gateway] Session registered: {} (total: {})",
            id,
            self.sessions.len()
        );

        (
            SessionGuard {
                id,
                registry: Arc::clone(self),
                cancel,
                connected_at,
            },
            rx,
        )
    }

    fn unregister(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            log::info!(
                "[Gateway] Session unregistered: {} (remaining: {})",
                id,
                self.sessions.len()
            );
        }
    }

    /// Enqueues an event to a session's outbox without blocking.
    pub fn send(&self, id: &str, event: ServerEvent) -> SendOutcome {
        let Some(entry) = self.sessions.get(id) else {
            return SendOutcome::Closed;
        };
        match entry.outbox.try_send(event) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("[Gateway] Outbox overflow, dropping session {}", id);
                entry.cancel.cancel();
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Whether a session's transport is still draining its outbox.
    #[must_use]
    pub fn is_live(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .map(|e| !e.outbox.is_closed())
            .unwrap_or(false)
    }

    /// When the session's transport connected.
    #[must_use]
    pub fn connected_at(&self, id: &str) -> Option<Instant> {
        self.sessions.get(id).map(|e| e.connected_at)
    }

    /// Cancels a single session, closing its transport.
    pub fn kick(&self, id: &str) {
        if let Some(entry) = self.sessions.get(id) {
            entry.cancel.cancel();
        }
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Force-closes all sessions.
    ///
    /// Cancels the global token, signalling every transport handler to
    /// terminate, then installs a fresh token so new sessions can still be
    /// accepted. Returns the number of sessions signalled.
    pub fn close_all(&self) -> usize {
        let count = self.sessions.len();
        if count > 0 {
            log::info!("[Gateway] Force-closing {} session(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

/// RAII guard that unregisters a session when dropped.
///
/// Held by the owning transport task so sessions are cleaned up even if the
/// handler panics or exits early.
pub struct SessionGuard {
    id: SessionId,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
    connected_at: Instant,
}

impl SessionGuard {
    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the cancellation token for this session.
    ///
    /// Transports select on this to observe force-close requests (outbox
    /// overflow, shutdown, long-poll idle reaping).
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// When the transport connected. Used for the post-connect join grace.
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_send_and_drain() {
        let registry = Arc::new(SessionRegistry::new(8));
        let (guard, mut rx) = registry.register();

        assert_eq!(
            registry.send(guard.id(), ServerEvent::RequestHostTime),
            SendOutcome::Queued
        );
        assert!(matches!(rx.recv().await, Some(ServerEvent::RequestHostTime)));
    }

    #[tokio::test]
    async fn overflow_cancels_session() {
        let registry = Arc::new(SessionRegistry::new(1));
        let (guard, _rx) = registry.register();

        assert_eq!(
            registry.send(guard.id(), ServerEvent::RequestHostTime),
            SendOutcome::Queued
        );
        assert_eq!(
            registry.send(guard.id(), ServerEvent::RequestHostTime),
            SendOutcome::Dropped
        );
        assert!(guard.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn dropped_receiver_marks_session_stale() {
        let registry = Arc::new(SessionRegistry::new(8));
        let (guard, rx) = registry.register();

        assert!(registry.is_live(guard.id()));
        drop(rx);
        assert!(!registry.is_live(guard.id()));
        assert_eq!(
            registry.send(guard.id(), ServerEvent::RequestHostTime),
            SendOutcome::Closed
        );
    }

    #[tokio::test]
    async fn guard_drop_unregisters() {
        let registry = Arc::new(SessionRegistry::new(8));
        let (guard, _rx) = registry.register();
        let id = guard.id().to_string();

        assert_eq!(registry.session_count(), 1);
        drop(guard);
        assert_eq!(registry.session_count(), 0);
        assert_eq!(
            registry.send(&id, ServerEvent::RequestHostTime),
            SendOutcome::Closed
        );
    }

    #[tokio::test]
    async fn close_all_cancels_and_allows_new_sessions() {
        let registry = Arc::new(SessionRegistry::new(8));
        let (guard_a, _rx_a) = registry.register();
        let (guard_b, _rx_b) = registry.register();

        assert_eq!(registry.close_all(), 2);
        assert!(guard_a.cancel_token().is_cancelled());
        assert!(guard_b.cancel_token().is_cancelled());

        let (guard_c, _rx_c) = registry.register();
        assert!(!guard_c.cancel_token().is_cancelled());
    }
}
