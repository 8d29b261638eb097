//! Envelope lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope status.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Pending (rescheduled with backoff, loop until max_retries)
/// - Pending -> Processing -> DeadLetter (retries exhausted, dead-letter topic configured)
/// - Pending -> Processing -> Failed (retries exhausted, no dead-letter topic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLetter,
}

impl EnvelopeStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnvelopeStatus::Completed | EnvelopeStatus::Failed | EnvelopeStatus::DeadLetter
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeStatus::Pending => "pending",
            EnvelopeStatus::Processing => "processing",
            EnvelopeStatus::Completed => "completed",
            EnvelopeStatus::Failed => "failed",
            EnvelopeStatus::DeadLetter => "dead-letter",
        }
    }
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_as_wire_names() {
        let s = serde_json::to_string(&EnvelopeStatus::DeadLetter).unwrap();
        assert_eq!(s, "\"dead-letter\"");

        let back: EnvelopeStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(back, EnvelopeStatus::Processing);
    }

    #[test]
    fn only_outcomes_are_terminal() {
        assert!(!EnvelopeStatus::Pending.is_terminal());
        assert!(!EnvelopeStatus::Processing.is_terminal());
        assert!(EnvelopeStatus::Completed.is_terminal());
        assert!(EnvelopeStatus::Failed.is_terminal());
        assert!(EnvelopeStatus::DeadLetter.is_terminal());
    }
}
