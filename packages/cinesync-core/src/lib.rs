//! CineSync Core - shared library for CineSync watch parties.
//!
//! This crate provides the core functionality for CineSync, a synchronized
//! video watch-party service: geographically distributed clients view the
//! same video and observe the same playback state within a bounded drift.
//! It is designed to be embedded by the standalone headless server.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`room`]: per-room authoritative state machines, host election, and
//!   the client/server event protocol
//! - [`session`]: gateway session registry with bounded outboxes
//! - [`api`]: HTTP/WebSocket/long-poll surface
//! - [`media`]: range-capable media proxy and process-based transcoding
//! - [`store`]: durable persistence interfaces (rooms, chat history)
//! - [`config`]: configuration types
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! Core logic is decoupled from its collaborators through traits, each with
//! a default implementation suitable for the standalone server:
//!
//! - [`RoomStore`](store::RoomStore) / [`MessageStore`](store::MessageStore):
//!   durable persistence (built-in: in-memory)
//! - [`MediaSource`](media::MediaSource): upstream blob reads
//!   (built-in: HTTP with range forwarding)
//! - [`Transcoder`](media::Transcoder): shared-encoder transcoding
//!   (built-in: ffmpeg child processes)

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod media;
pub mod room;
pub mod session;
pub mod store;
pub mod utils;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, AppStateBuilder, ServerError};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use config::{Config, LimitsConfig, MediaConfig, SyncConfig};
pub use error::{CinesyncError, CinesyncResult, ErrorCode};
pub use room::protocol::{ClientEvent, ServerEvent, UserEntry};
pub use room::Coordinator;
pub use session::SessionRegistry;
pub use store::{ChatMessage, PlaybackState, RoomRecord};
pub use utils::now_millis;
