//! Dispatcher configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! async_enabled = true
//! workers = 1
//! poll_interval_ms = 1000
//! max_retries = 3
//! shutdown_grace_ms = 30000
//! # queue_capacity = 10000
//! fallback_when_stopped = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed parsing config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Queue submissions for the background processor. When false every
    /// submission is delivered inline.
    pub async_enabled: bool,

    /// Number of worker loops sharing the queue.
    pub workers: usize,

    /// Sleep between polls of an empty queue.
    pub poll_interval_ms: u64,

    pub max_retries: u32,

    /// How long `stop()` waits for in-flight deliveries before aborting them.
    pub shutdown_grace_ms: u64,

    /// `None` means unbounded.
    pub queue_capacity: Option<usize>,

    /// In queued mode, deliver inline while the processor is not running.
    pub fallback_when_stopped: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            async_enabled: true,
            workers: 1,
            poll_interval_ms: 1000,
            max_retries: RetryPolicy::DEFAULT_MAX_RETRIES,
            shutdown_grace_ms: 30_000,
            queue_capacity: None,
            fallback_when_stopped: true,
        }
    }
}

impl DispatchConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "queue_capacity must be greater than 0 (omit it for unbounded)".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_document_gives_defaults() {
        let config = DispatchConfig::from_toml_str("").unwrap();
        assert_eq!(config, DispatchConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(config.retry_policy().max_retries, 3);
        assert!(config.async_enabled);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = DispatchConfig::from_toml_str(
            r#"
            workers = 4
            poll_interval_ms = 25
            queue_capacity = 500
            async_enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.poll_interval(), Duration::from_millis(25));
        assert_eq!(config.queue_capacity, Some(500));
        assert!(!config.async_enabled);
        assert_eq!(config.max_retries, 3);
    }

    #[rstest]
    #[case::no_workers("workers = 0")]
    #[case::zero_poll("poll_interval_ms = 0")]
    #[case::zero_capacity("queue_capacity = 0")]
    fn invalid_values_are_rejected(#[case] raw: &str) {
        let err = DispatchConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = DispatchConfig::from_toml_str("workers = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = DispatchConfig::load("/definitely/not/here/herald.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
