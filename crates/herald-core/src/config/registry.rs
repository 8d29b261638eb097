//! QueueRegistry - queue name to validated policy.

use std::collections::BTreeMap;

use super::{ConfigError, QueueConfig, QueuesConfig};
use crate::domain::errors::QueueError;

/// A queue whose transport binding names are known to be present.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQueue {
    pub name: String,
    pub topic: String,
    pub subscription: String,
    pub config: QueueConfig,
}

/// Immutable after construction; there is no reload.
#[derive(Debug, Clone)]
pub struct QueueRegistry {
    queues: BTreeMap<String, QueueConfig>,
}

impl QueueRegistry {
    pub fn new(config: QueuesConfig) -> Result<Self, ConfigError> {
        if config.queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }
        Ok(Self {
            queues: config.queues,
        })
    }

    pub fn resolve(&self, name: &str) -> Result<ResolvedQueue, QueueError> {
        let config = self
            .queues
            .get(name)
            .ok_or_else(|| QueueError::QueueNotConfigured(name.to_string()))?;

        let invalid = |reason: &str| QueueError::InvalidQueueConfig {
            queue: name.to_string(),
            reason: reason.to_string(),
        };

        let topic = non_empty(config.topic.as_deref()).ok_or_else(|| invalid("topic is required"))?;
        let subscription = non_empty(config.subscription.as_deref())
            .ok_or_else(|| invalid("subscription is required"))?;
        if config
            .dead_letter
            .as_ref()
            .is_some_and(|d| d.topic.is_empty())
        {
            return Err(invalid("dead_letter.topic must not be empty"));
        }

        Ok(ResolvedQueue {
            name: name.to_string(),
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            config: config.clone(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}
