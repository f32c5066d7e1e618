//! Configuration loading for the subscription client.
//!
//! Configuration is loaded from a TOML file with a `[client]` and a
//! `[resubscribe]` table. Every field has a default.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use wdm_core::BackoffConfig;

use crate::error::ClientError;

/// Largest liveness timeout a subscribe request may ask for, in seconds.
pub const MAX_TIMEOUT_SECS: u32 = 3_600_000;

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Client configuration.
    #[serde(default)]
    pub client: ClientSection,
    /// Backoff for resubscribe and update retries.
    #[serde(default)]
    pub resubscribe: BackoffConfig,
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSection {
    /// How long to wait for the subscription to be confirmed, in
    /// milliseconds (default: 30000).
    #[serde(default = "default_subscribing_timeout_ms")]
    pub inactivity_timeout_during_subscribing_ms: u64,
    /// Response timeout for each exchange, in milliseconds (default: 10000).
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Liveness timeout for counter-subscriptions when the peer names none,
    /// in seconds (default: none).
    pub default_liveness_timeout_secs: Option<u32>,
    /// Maximum update payload size in bytes; 0 selects 65535 (default: 0).
    #[serde(default)]
    pub max_update_size: usize,
    /// Capacity of each update path set (default: 16).
    #[serde(default = "default_path_set_capacity")]
    pub path_set_capacity: usize,
    /// Maximum updatable traits per client (default: 8).
    #[serde(default = "default_max_updatable_traits")]
    pub max_updatable_traits: usize,
    /// Number of clients in a pool (default: 4).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Resubscribe after failures instead of giving up (default: true).
    #[serde(default = "default_resubscribe_enabled")]
    pub resubscribe_enabled: bool,
}

// Default value functions
fn default_subscribing_timeout_ms() -> u64 {
    30_000
}

fn default_response_timeout_ms() -> u64 {
    10_000
}

fn default_path_set_capacity() -> usize {
    16
}

fn default_max_updatable_traits() -> usize {
    8
}

fn default_pool_size() -> usize {
    4
}

fn default_resubscribe_enabled() -> bool {
    true
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            inactivity_timeout_during_subscribing_ms: default_subscribing_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            default_liveness_timeout_secs: None,
            max_update_size: 0,
            path_set_capacity: default_path_set_capacity(),
            max_updatable_traits: default_max_updatable_traits(),
            pool_size: default_pool_size(),
            resubscribe_enabled: default_resubscribe_enabled(),
        }
    }
}

impl ClientSection {
    /// Subscribing inactivity timeout as a duration.
    pub fn inactivity_timeout_during_subscribing(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_during_subscribing_ms)
    }

    /// Exchange response timeout as a duration.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Default liveness timeout as a duration.
    pub fn default_liveness_timeout(&self) -> Option<Duration> {
        self.default_liveness_timeout_secs
            .map(|secs| Duration::from_secs(u64::from(secs)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: ClientSection::default(),
            resubscribe: BackoffConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

/// Liveness timeout bounds requested in a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionTimeouts {
    /// Lower bound, seconds.
    pub min_secs: Option<u32>,
    /// Upper bound, seconds.
    pub max_secs: Option<u32>,
}

impl SubscriptionTimeouts {
    /// Create bounds.
    pub fn new(min_secs: Option<u32>, max_secs: Option<u32>) -> Self {
        Self { min_secs, max_secs }
    }

    /// Check the bounds against each other and [`MAX_TIMEOUT_SECS`].
    pub fn validate(&self) -> Result<(), ClientError> {
        for bound in [self.min_secs, self.max_secs].into_iter().flatten() {
            if bound > MAX_TIMEOUT_SECS {
                return Err(ClientError::ConfigurationInvalid(format!(
                    "timeout {}s exceeds {}s",
                    bound, MAX_TIMEOUT_SECS
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_secs, self.max_secs) {
            if min > max {
                return Err(ClientError::ConfigurationInvalid(format!(
                    "timeout min {}s above max {}s",
                    min, max
                )));
            }
        }
        Ok(())
    }
}
