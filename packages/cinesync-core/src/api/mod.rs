//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the coordinator and
//! media pipeline. It provides router construction and server startup.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::poll::PollGateway;
use crate::config::Config;
use crate::media::{MediaSource, Transcoder};
use crate::room::Coordinator;
use crate::session::SessionRegistry;

pub mod http;
pub mod poll;
pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin wrapper over the wired services; all business logic lives in the
/// services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Authoritative room coordinator.
    pub coordinator: Arc<Coordinator>,
    /// Gateway session registry (shared by WebSocket and long-poll).
    pub sessions: Arc<SessionRegistry>,
    /// Upstream media reader.
    pub media_source: Arc<dyn MediaSource>,
    /// Shared-encoder transcoding registry.
    pub transcoder: Arc<dyn Transcoder>,
    /// Long-poll fallback transport.
    pub poll: Arc<PollGateway>,
    /// Application configuration.
    pub config: Arc<Config>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    coordinator: Option<Arc<Coordinator>>,
    sessions: Option<Arc<SessionRegistry>>,
    media_source: Option<Arc<dyn MediaSource>>,
    transcoder: Option<Arc<dyn Transcoder>>,
    poll: Option<Arc<PollGateway>>,
    config: Option<Arc<Config>>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the room coordinator.
    pub fn coordinator(mut self, coordinator: Arc<Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Sets the session registry.
    pub fn sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Sets the upstream media source.
    pub fn media_source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.media_source = Some(source);
        self
    }

    /// Sets the transcoder.
    pub fn transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    /// Sets the long-poll gateway.
    pub fn poll(mut self, poll: Arc<PollGateway>) -> Self {
        self.poll = Some(poll);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            coordinator: self.coordinator.expect("coordinator is required"),
            sessions: self.sessions.expect("sessions is required"),
            media_source: self.media_source.expect("media_source is required"),
            transcoder: self.transcoder.expect("transcoder is required"),
            poll: self.poll.expect("poll is required"),
            config: self.config.expect("config is required"),
        }
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Starts the HTTP server on the configured port, serving until `shutdown`
/// is cancelled.
pub async fn start_server(state: AppState, shutdown: CancellationToken) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Server listening on http://{}", addr);

    let app = http::create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
