//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::poll::PollGateway;
use crate::api::AppState;
use crate::config::Config;
use crate::error::{CinesyncError, CinesyncResult};
use crate::media::{FfmpegTranscoder, HttpMediaSource, MediaSource, Transcoder};
use crate::room::Coordinator;
use crate::session::SessionRegistry;
use crate::store::{MemoryMessageStore, MemoryRoomStore, MessageStore, RoomStore};

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Authoritative room coordinator.
    pub coordinator: Arc<Coordinator>,
    /// Gateway session registry.
    pub sessions: Arc<SessionRegistry>,
    /// Durable room storage.
    pub room_store: Arc<dyn RoomStore>,
    /// Durable chat storage.
    pub message_store: Arc<dyn MessageStore>,
    /// Upstream media reader.
    pub media_source: Arc<dyn MediaSource>,
    /// Shared-encoder transcoder.
    pub transcoder: Arc<dyn Transcoder>,
    /// Long-poll gateway.
    pub poll: Arc<PollGateway>,
    /// Application configuration.
    pub config: Arc<Config>,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Builds the API state over these services.
    #[must_use]
    pub fn app_state(&self) -> AppState {
        AppState::builder()
            .coordinator(Arc::clone(&self.coordinator))
            .sessions(Arc::clone(&self.sessions))
            .media_source(Arc::clone(&self.media_source))
            .transcoder(Arc::clone(&self.transcoder))
            .poll(Arc::clone(&self.poll))
            .config(Arc::clone(&self.config))
            .build()
    }

    /// Initiates graceful shutdown of all services.
    ///
    /// Order matters: rooms are cancelled first (each actor flushes its
    /// record to the store on the way out), then gateway sessions close,
    /// then encoders are told to stop with protected run times waived.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.cancel_token.cancel();
        // Let room actors run their final store flush before the process
        // races ahead to close everything else.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let closed = self.sessions.close_all();
        if closed > 0 {
            log::info!("[Bootstrap] Closed {} gateway session(s)", closed);
        }

        self.transcoder.shutdown();

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Builds the store pair for the configured DSN.
///
/// Concrete database drivers live behind the store traits and out of this
/// crate; only the built-in memory store is constructed here.
fn build_stores(
    dsn: &str,
) -> CinesyncResult<(Arc<dyn RoomStore>, Arc<dyn MessageStore>)> {
    if dsn == "memory://" {
        Ok((
            Arc::new(MemoryRoomStore::new()),
            Arc::new(MemoryMessageStore::new()),
        ))
    } else {
        Err(CinesyncError::Configuration(format!(
            "unsupported storage DSN {dsn:?}; only memory:// is built in"
        )))
    }
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root. Wiring order matters - services are
/// created in dependency order:
///
/// 1. Stores (from the storage DSN)
/// 2. Session registry and shutdown token
/// 3. Coordinator (stores + sessions)
/// 4. Media source and transcoder
/// 5. Long-poll gateway (sessions + coordinator), with its sweeper
///
/// Must be called from within a Tokio runtime: the long-poll sweeper is
/// spawned here.
pub fn bootstrap_services(config: &Config) -> CinesyncResult<BootstrappedServices> {
    config
        .validate()
        .map_err(CinesyncError::Configuration)?;
    let config = Arc::new(config.clone());

    let (room_store, message_store) = build_stores(&config.storage_dsn)?;
    let sessions = Arc::new(SessionRegistry::new(config.limits.outbox_capacity));
    let cancel_token = CancellationToken::new();

    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&sessions),
        Arc::clone(&room_store),
        Arc::clone(&message_store),
        &config.limits,
        config.sync.clone(),
        cancel_token.child_token(),
    ));

    let media_source: Arc<dyn MediaSource> = Arc::new(
        HttpMediaSource::new(&config.media).map_err(CinesyncError::from)?,
    );
    let transcoder: Arc<dyn Transcoder> =
        Arc::new(FfmpegTranscoder::new(Arc::clone(&media_source)));

    let poll = Arc::new(PollGateway::new(
        Arc::clone(&sessions),
        Arc::clone(&coordinator),
        Duration::from_millis(config.limits.post_connect_grace_ms),
    ));
    poll.start_sweeper(cancel_token.child_token());

    Ok(BootstrappedServices {
        coordinator,
        sessions,
        room_store,
        message_store,
        media_source,
        transcoder,
        poll,
        config,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_with_defaults_succeeds() {
        let services = bootstrap_services(&Config::default()).unwrap();
        assert_eq!(services.coordinator.active_room_count(), 0);
        assert_eq!(services.sessions.session_count(), 0);
        // AppState can be assembled from the container.
        let _ = services.app_state();
    }

    #[tokio::test]
    async fn bootstrap_rejects_unknown_dsn() {
        let mut config = Config::default();
        config.storage_dsn = "postgres://localhost/cinesync".to_string();
        assert!(matches!(
            bootstrap_services(&config).map(|_| ()),
            Err(CinesyncError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_limits() {
        let mut config = Config::default();
        config.limits.outbox_capacity = 0;
        assert!(bootstrap_services(&config).is_err());
    }
}
