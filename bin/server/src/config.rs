//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys
//! use `__` (`PROVIDER__BASE_URL`) and lists use `,`
//! (`SESSION__START_TOKENS=开始,start`).
//!
//! See [`OpenAiCompatibleConfig`] for the provider settings.

use aichat_ai::OpenAiCompatibleConfig;
use aichat_conversation::SessionPolicy;
use aichat_conversation::policy::{DEFAULT_END_MARKERS, DEFAULT_START_TOKENS};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Completion provider configuration.
    pub provider: OpenAiCompatibleConfig,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Prompts that open a session in a room without one.
    #[serde(default = "default_start_tokens")]
    pub start_tokens: Vec<String>,

    /// Reply fragments that close the session.
    #[serde(default = "default_end_markers")]
    pub end_markers: Vec<String>,

    /// System prompt sent ahead of every transcript.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Maximum number of concurrently active rooms. Unbounded if unset.
    #[serde(default)]
    pub max_rooms: Option<usize>,

    /// Sessions idle for longer than this are ended. Never if unset.
    #[serde(default)]
    pub idle_ttl_seconds: Option<u64>,

    /// Interval between idle sweeps, in seconds.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_start_tokens() -> Vec<String> {
    DEFAULT_START_TOKENS.iter().map(ToString::to_string).collect()
}

fn default_end_markers() -> Vec<String> {
    DEFAULT_END_MARKERS.iter().map(ToString::to_string).collect()
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_tokens: default_start_tokens(),
            end_markers: default_end_markers(),
            system_prompt: None,
            max_rooms: None,
            idle_ttl_seconds: None,
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl SessionConfig {
    /// Builds the start/end policy.
    #[must_use]
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy::new(self.start_tokens.iter().cloned(), self.end_markers.iter().cloned())
    }

    /// Returns the idle TTL, if idle eviction is enabled.
    #[must_use]
    pub fn idle_ttl(&self) -> Option<Duration> {
        self.idle_ttl_seconds.map(Duration::from_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        // A zero period would make `tokio::time::interval` panic.
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                environment
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("session.start_tokens")
                    .with_list_parse_key("session.end_markers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
