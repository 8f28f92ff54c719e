//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `CINESYNC_PORT`
    pub port: u16,

    /// Environment label reported by the health endpoint.
    /// Override: `CINESYNC_ENVIRONMENT`
    pub environment: String,

    /// Origins permitted by CORS.
    /// Override: `CINESYNC_ALLOWED_ORIGINS` (comma-separated)
    pub allowed_origins: Vec<String>,

    /// Storage DSN (`memory://` for the built-in store).
    /// Override: `CINESYNC_STORAGE_DSN`
    pub storage_dsn: String,

    /// Bearer token attached to upstream media requests.
    /// Override: `CINESYNC_UPSTREAM_BEARER_TOKEN`
    pub upstream_bearer_token: Option<String>,

    /// Maximum upstream media size served, in bytes.
    pub media_size_cap_bytes: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = cinesync_core::Config::default();
        Self {
            port: core.port,
            environment: core.environment,
            allowed_origins: core.allowed_origins,
            storage_dsn: core.storage_dsn,
            upstream_bearer_token: None,
            media_size_cap_bytes: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CINESYNC_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }

        if let Ok(val) = std::env::var("CINESYNC_ENVIRONMENT") {
            if !val.is_empty() {
                self.environment = val;
            }
        }

        if let Ok(val) = std::env::var("CINESYNC_ALLOWED_ORIGINS") {
            let origins: Vec<String> = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !origins.is_empty() {
                self.allowed_origins = origins;
            }
        }

        if let Ok(val) = std::env::var("CINESYNC_STORAGE_DSN") {
            if !val.is_empty() {
                self.storage_dsn = val;
            }
        }

        if let Ok(val) = std::env::var("CINESYNC_UPSTREAM_BEARER_TOKEN") {
            if !val.is_empty() {
                self.upstream_bearer_token = Some(val);
            }
        }
    }

    /// Converts to cinesync-core's Config type.
    pub fn to_core_config(&self) -> cinesync_core::Config {
        let mut config = cinesync_core::Config {
            port: self.port,
            environment: self.environment.clone(),
            allowed_origins: self.allowed_origins.clone(),
            storage_dsn: self.storage_dsn.clone(),
            ..Default::default()
        };
        config.media.upstream_bearer_token = self.upstream_bearer_token.clone();
        if let Some(cap) = self.media_size_cap_bytes {
            config.media.size_cap_bytes = cap;
        }
        config
    }
}
