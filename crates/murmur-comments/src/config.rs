//! Comments Cache Configuration
//!
//! Tunables for polling, request deduplication and background retries.
//! Every field has a default, so an empty TOML document is a valid config.

use crate::retry::{BackoffStrategy, RetryPolicy};
use murmur_core::DEFAULT_ID_LENGTH;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connectivity of the underlying room connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection being established
    Connecting,
    /// Connected and synchronized
    Connected,
    /// Connection lost, trying to reconnect
    Reconnecting,
}

impl ConnectionStatus {
    /// Whether the connection is live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("invalid comments config: {0}")]
    Parse(String),

    /// A field has an unusable value
    #[error("invalid comments config field `{field}`: {reason}")]
    InvalidField {
        /// Offending field
        field: &'static str,
        /// Why it is invalid
        reason: &'static str,
    },
}

/// Polling intervals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Poll interval while the connection is live, in milliseconds
    pub live_interval_ms: u64,
    /// Poll interval otherwise, in milliseconds
    pub offline_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            live_interval_ms: 5_000,
            offline_interval_ms: 60_000,
        }
    }
}

impl PollingConfig {
    /// Interval to use for the given connection status.
    pub fn interval_for(&self, status: ConnectionStatus) -> Duration {
        if status.is_live() {
            Duration::from_millis(self.live_interval_ms)
        } else {
            Duration::from_millis(self.offline_interval_ms)
        }
    }
}

/// Background revalidation retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Add random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Build the retry policy described by this config.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            strategy: if self.jitter {
                BackoffStrategy::ExponentialWithJitter
            } else {
                BackoffStrategy::Exponential
            },
        }
    }
}

/// Comments cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentsConfig {
    /// Polling intervals
    pub polling: PollingConfig,
    /// How long a started revalidation is reused by later callers, in milliseconds
    pub dedupe_interval_ms: u64,
    /// Background retry settings
    pub retry: RetryConfig,
    /// Length of the random suffix of client-generated ids
    pub id_length: usize,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            polling: PollingConfig::default(),
            dedupe_interval_ms: 2_000,
            retry: RetryConfig::default(),
            id_length: DEFAULT_ID_LENGTH,
        }
    }
}

impl CommentsConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Dedupe window as a duration.
    pub fn dedupe_interval(&self) -> Duration {
        Duration::from_millis(self.dedupe_interval_ms)
    }

    /// Reject values the cache cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.live_interval_ms == 0 {
            return Err(ConfigError::InvalidField {
                field: "polling.live_interval_ms",
                reason: "must be greater than zero",
            });
        }
        if self.polling.offline_interval_ms == 0 {
            return Err(ConfigError::InvalidField {
                field: "polling.offline_interval_ms",
                reason: "must be greater than zero",
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidField {
                field: "retry.max_attempts",
                reason: "must allow at least one attempt",
            });
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidField {
                field: "retry.initial_delay_ms",
                reason: "must not exceed retry.max_delay_ms",
            });
        }
        if self.id_length < 8 {
            return Err(ConfigError::InvalidField {
                field: "id_length",
                reason: "must be at least 8 characters",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = CommentsConfig::from_toml_str("").unwrap();
        assert_eq!(config, CommentsConfig::default());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = CommentsConfig::from_toml_str(
            r#"
            dedupe_interval_ms = 250

            [polling]
            live_interval_ms = 1000

            [retry]
            jitter = false
            "#,
        )
        .unwrap();

        assert_eq!(config.dedupe_interval(), Duration::from_millis(250));
        assert_eq!(config.polling.live_interval_ms, 1_000);
        assert_eq!(config.polling.offline_interval_ms, 60_000);
        assert_eq!(config.retry.policy().strategy, BackoffStrategy::Exponential);
    }

    #[test]
    fn live_connection_polls_faster() {
        let polling = PollingConfig::default();
        assert!(
            polling.interval_for(ConnectionStatus::Connected)
                < polling.interval_for(ConnectionStatus::Reconnecting)
        );
    }

    #[test]
    fn rejects_unusable_values() {
        let err = CommentsConfig::from_toml_str("[retry]\nmax_attempts = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "retry.max_attempts",
                ..
            }
        ));
        assert!(matches!(
            CommentsConfig::from_toml_str("id_length = \"long\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
