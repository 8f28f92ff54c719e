//! Join-attempt rate limiting.
//!
//! Browser reconnect storms show up as rapid `join-room` bursts from the
//! same session. Each session gets a rolling window of timestamps; an
//! attempt past the cap is rejected without touching room state.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::session::SessionId;

/// Sliding-window rate limiter keyed by session.
pub struct JoinRateLimiter {
    window: Duration,
    max_attempts: usize,
    attempts: DashMap<SessionId, VecDeque<Instant>>,
}

impl JoinRateLimiter {
    /// Creates a limiter allowing `max_attempts` per `window` per session.
    #[must_use]
    pub fn new(window: Duration, max_attempts: usize) -> Self {
        Self {
            window,
            max_attempts,
            attempts: DashMap::new(),
        }
    }

    /// Records a join attempt for `session_id` and reports whether it is
    /// allowed. Rejected attempts are not recorded, so a client backing off
    /// recovers as soon as older attempts age out of the window.
    pub fn check(&self, session_id: &str) -> bool {
        self.check_at(session_id, Instant::now())
    }

    fn check_at(&self, session_id: &str, now: Instant) -> bool {
        let mut entry = self
            .attempts
            .entry(session_id.to_string())
            .or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() >= self.max_attempts {
            return false;
        }
        entry.push_back(now);
        true
    }

    /// Drops the tracking state for a session that disconnected.
    pub fn forget(&self, session_id: &str) {
        self.attempts.remove(session_id);
    }

    /// Number of sessions currently tracked.
    #[must_use]
    pub fn tracked_sessions(&self) -> usize {
        self.attempts.len()
    }
}
