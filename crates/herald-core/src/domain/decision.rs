//! Decision model: what happens to an envelope after a failed dispatch.
//!
//! This module defines the Decision type (what to do next) and the Decider trait
//! (how to determine it from the envelope and its queue policy).

use std::time::Duration;

use super::envelope::Envelope;
use super::retry::RetryPolicy;
use crate::config::QueueConfig;

/// Reason recorded on envelopes routed to the dead-letter topic.
pub const MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";

/// The next action to take for a failed envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Republish to the envelope's own topic after `delay`.
    Retry { delay: Duration },

    /// Retries exhausted; route to the configured dead-letter topic.
    DeadLetter { reason: String },

    /// Retries exhausted and no dead-letter topic: mark failed.
    Fail { reason: String },
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Decision::Retry { .. })
    }
}

/// Trait for deciding the next action after a failure.
///
/// Deciders are pure functions: given the current envelope and its queue
/// policy, they return the next action without side effects. Executing the
/// decision (republishing, dead-lettering) is the RetryController's job.
pub trait Decider: Send + Sync {
    fn decide(&self, envelope: &Envelope, config: &QueueConfig) -> Decision;
}

/// Retry-count based policy with capped exponential backoff.
///
/// - Retry if retry_count < max_retries
/// - Otherwise dead-letter (when configured) or fail
///
/// `max_retries` comes from the envelope metadata when present, else from the
/// queue config.
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider;

impl Decider for DefaultDecider {
    fn decide(&self, envelope: &Envelope, config: &QueueConfig) -> Decision {
        let retry_count = envelope.metadata.retry_count;
        let max_retries = envelope.metadata.max_retries.unwrap_or(config.max_retries);

        if retry_count < max_retries {
            return Decision::Retry {
                delay: RetryPolicy::from(config).next_delay(retry_count),
            };
        }

        if config.dead_letter.is_some() {
            Decision::DeadLetter {
                reason: MAX_RETRIES_EXCEEDED.to_string(),
            }
        } else {
            Decision::Fail {
                reason: format!("Max retries reached: {retry_count}/{max_retries}"),
            }
        }
    }
}
