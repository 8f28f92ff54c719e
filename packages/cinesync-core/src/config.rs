//! Core application configuration types.
//!
//! Groups the tunables for the coordinator ([`LimitsConfig`], [`SyncConfig`]),
//! the media pipeline ([`MediaConfig`]) and the server surface ([`Config`]).
//! All fields have sensible defaults; the server binary layers YAML and
//! environment overrides on top.

use serde::{Deserialize, Serialize};

/// Default media size cap: 5 GiB.
pub const DEFAULT_MEDIA_SIZE_CAP: u64 = 5 * 1024 * 1024 * 1024;

/// Configuration for join-storm defenses and session back-pressure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Rolling window for the join rate limit (seconds).
    pub join_window_secs: u64,

    /// Maximum join attempts per session inside the rolling window.
    pub join_max_attempts: usize,

    /// Delay applied to joins arriving sooner than this after the transport
    /// connected (milliseconds). Absorbs browser reconnect storms.
    pub post_connect_grace_ms: u64,

    /// Capacity of each session's bounded outbox. A session whose outbox
    /// overflows is dropped rather than allowed to stall the room.
    pub outbox_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            join_window_secs: 15,
            join_max_attempts: 5,
            post_connect_grace_ms: 1000,
            outbox_capacity: 64,
        }
    }
}

/// Configuration for the periodic playback sync exchange.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncConfig {
    /// Interval between `server:request-host-time` probes (seconds).
    pub tick_secs: u64,

    /// Follower drift threshold (seconds). Advertised to clients in
    /// `sync-state`; followers seek locally when they drift past it.
    pub drift_threshold_secs: f64,

    /// Gap between `host-assigned` and `sync-state` on join (milliseconds).
    /// Guarantees the client registers its role before state arrives.
    pub event_order_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_secs: 10,
            drift_threshold_secs: 1.5,
            event_order_delay_ms: 50,
        }
    }
}

/// Configuration for the media proxy and transcoding pipeline.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaConfig {
    /// Maximum upstream media size served (bytes).
    pub size_cap_bytes: u64,

    /// Optional bearer token attached to upstream media requests.
    pub upstream_bearer_token: Option<String>,

    /// Timeout for upstream metadata probes (seconds).
    pub probe_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            size_cap_bytes: DEFAULT_MEDIA_SIZE_CAP,
            upstream_bearer_token: None,
            probe_timeout_secs: 10,
        }
    }
}

/// Configuration for the CineSync server.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Port for the HTTP/WS server.
    pub port: u16,

    /// Environment label reported by `/api/health` (e.g. "development").
    pub environment: String,

    /// Origins permitted by CORS. Credentials are always allowed for the
    /// enumerated origins.
    pub allowed_origins: Vec<String>,

    /// Storage DSN. `memory://` selects the built-in in-memory store;
    /// any other scheme must be provided by an external store binding.
    pub storage_dsn: String,

    /// Join-storm and back-pressure limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Playback sync tunables.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Media proxy tunables.
    #[serde(default)]
    pub media: MediaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8900,
            environment: "development".to_string(),
            allowed_origins: vec!["http://localhost:5173".to_string()],
            storage_dsn: "memory://".to_string(),
            limits: LimitsConfig::default(),
            sync: SyncConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.limits.join_max_attempts == 0 {
            return Err("limits.join_max_attempts must be >= 1".to_string());
        }
        if self.limits.join_window_secs == 0 {
            return Err("limits.join_window_secs must be >= 1".to_string());
        }
        if self.limits.outbox_capacity == 0 {
            return Err("limits.outbox_capacity must be >= 1 (mpsc::channel panics on 0)".to_string());
        }
        if self.sync.tick_secs == 0 {
            return Err("sync.tick_secs must be >= 1".to_string());
        }
        if !self.sync.drift_threshold_secs.is_finite() || self.sync.drift_threshold_secs <= 0.0 {
            return Err("sync.drift_threshold_secs must be a positive number".to_string());
        }
        if self.media.size_cap_bytes == 0 {
            return Err("media.size_cap_bytes must be >= 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn default_limits_match_protocol() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.join_window_secs, 15);
        assert_eq!(limits.join_max_attempts, 5);
        assert_eq!(limits.post_connect_grace_ms, 1000);
    }

    #[test]
    fn rejects_zero_values() {
        let mut config = Config::default();
        config.limits.outbox_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.tick_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.drift_threshold_secs = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_size_cap_is_five_gib() {
        assert_eq!(MediaConfig::default().size_cap_bytes, 5 * 1024 * 1024 * 1024);
    }
}
