//! Queue configuration
//!
//! Per-queue policy keyed by queue name, read from TOML once at start-up:
//!
//! ```toml
//! [queues.default]
//! topic = "default-topic"
//! subscription = "default-subscription"
//! max_retries = 3
//! retry_delay = 1000        # ms
//! max_retry_delay = 30000   # ms
//!
//! [queues.default.dead_letter]
//! topic = "default-dlq"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::{DeadLetterPolicy, SubscriptionOptions};

mod loader;
mod registry;

pub use loader::ConfigLoader;
pub use registry::{QueueRegistry, ResolvedQueue};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No queues configured")]
    NoQueues,

    #[error("No config file found (set HERALD_CONFIG or pass a path)")]
    NotFound,
}

/// Root configuration: one entry per queue name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    pub queues: BTreeMap<String, QueueConfig>,
}

impl QueuesConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn with_queue(mut self, name: impl Into<String>, config: QueueConfig) -> Self {
        self.queues.insert(name.into(), config);
        self
    }
}

/// Per-queue policy. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Required once resolved; optional here so a missing binding is
    /// reported as an invalid queue rather than a parse failure.
    pub topic: Option<String>,
    pub subscription: Option<String>,

    pub max_retries: u32,
    pub retry_delay: u64,
    pub max_retry_delay: u64,

    /// Dispatch timeout and transport ack deadline. `0` disables the dispatch timeout.
    pub message_timeout: u64,

    pub batch_size: usize,
    pub priority_levels: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<DeadLetterConfig>,

    /// Push delivery endpoint; pull delivery when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_endpoint: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            topic: None,
            subscription: None,
            max_retries: 3,
            retry_delay: 1_000,
            max_retry_delay: 30_000,
            message_timeout: 30_000,
            batch_size: 10,
            priority_levels: 10,
            dead_letter: None,
            push_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    pub topic: String,

    /// Transport-side delivery attempts before it dead-letters on its own.
    /// Falls back to `max_retries`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
}

impl QueueConfig {
    pub fn bound(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            subscription: Some(subscription.into()),
            ..Self::default()
        }
    }

    pub fn with_dead_letter(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter = Some(DeadLetterConfig {
            topic: topic.into(),
            threshold: None,
        });
        self
    }

    pub fn dead_letter_topic(&self) -> Option<&str> {
        self.dead_letter.as_ref().map(|d| d.topic.as_str())
    }

    /// `None` when `message_timeout` is 0.
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        (self.message_timeout > 0).then(|| Duration::from_millis(self.message_timeout))
    }

    /// Whole seconds, rounded up.
    pub fn ack_deadline(&self) -> Duration {
        Duration::from_secs(self.message_timeout.div_ceil(1_000))
    }

    pub fn subscription_options(&self) -> SubscriptionOptions {
        SubscriptionOptions {
            push_endpoint: self.push_endpoint.clone(),
            ack_deadline: self.ack_deadline(),
            min_backoff: Duration::from_millis(self.retry_delay),
            max_backoff: Duration::from_millis(self.max_retry_delay),
            dead_letter_policy: self.dead_letter.as_ref().map(|d| DeadLetterPolicy {
                topic: d.topic.clone(),
                max_delivery_attempts: d.threshold.unwrap_or(self.max_retries),
            }),
            max_outstanding_messages: self.batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [queues.default]
        topic = "default-topic"
        subscription = "default-subscription"

        [queues.delayed-tasks]
        topic = "delayed-topic"
        subscription = "delayed-subscription"
        max_retries = 5
        retry_delay = 500
        max_retry_delay = 10000
        message_timeout = 2500
        batch_size = 20
        push_endpoint = "https://example.test/queue/push"

        [queues.delayed-tasks.dead_letter]
        topic = "delayed-dlq"
        threshold = 7
    "#;

    #[test]
    fn parses_queues_with_defaults() {
        let cfg = QueuesConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.queues.len(), 2);

        let default = &cfg.queues["default"];
        assert_eq!(default.topic.as_deref(), Some("default-topic"));
        assert_eq!(default.max_retries, 3);
        assert_eq!(default.retry_delay, 1_000);
        assert_eq!(default.max_retry_delay, 30_000);
        assert_eq!(default.message_timeout, 30_000);
        assert_eq!(default.batch_size, 10);
        assert_eq!(default.priority_levels, 10);
        assert!(default.dead_letter.is_none());

        let delayed = &cfg.queues["delayed-tasks"];
        assert_eq!(delayed.max_retries, 5);
        assert_eq!(delayed.dead_letter_topic(), Some("delayed-dlq"));
    }

    #[test]
    fn subscription_options_follow_policy() {
        let cfg = QueuesConfig::from_toml_str(SAMPLE).unwrap();
        let opts = cfg.queues["delayed-tasks"].subscription_options();

        assert_eq!(opts.ack_deadline, Duration::from_secs(3));
        assert_eq!(opts.min_backoff, Duration::from_millis(500));
        assert_eq!(opts.max_backoff, Duration::from_secs(10));
        assert_eq!(opts.max_outstanding_messages, 20);
        assert_eq!(
            opts.push_endpoint.as_deref(),
            Some("https://example.test/queue/push")
        );
        let dlp = opts.dead_letter_policy.unwrap();
        assert_eq!(dlp.topic, "delayed-dlq");
        assert_eq!(dlp.max_delivery_attempts, 7);
    }

    #[test]
    fn dead_letter_threshold_falls_back_to_max_retries() {
        let cfg = QueueConfig::bound("t", "s").with_dead_letter("dlq");
        let dlp = cfg.subscription_options().dead_letter_policy.unwrap();
        assert_eq!(dlp.max_delivery_attempts, 3);
    }

    #[test]
    fn zero_timeout_disables_dispatch_timeout() {
        let cfg = QueueConfig {
            message_timeout: 0,
            ..QueueConfig::default()
        };
        assert_eq!(cfg.dispatch_timeout(), None);
        assert_eq!(
            QueueConfig::default().dispatch_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = QueuesConfig::from_toml_str("[queues.default]\nmax_retries = \"three\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let cfg = QueuesConfig::load(&path).unwrap();
        assert!(cfg.queues.contains_key("delayed-tasks"));
    }
}
