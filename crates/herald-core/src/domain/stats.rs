//! Process-wide aggregate counters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_messages: u64,
    pub processed_messages: u64,
    pub failed_messages: u64,
    pub dead_letter_messages: u64,

    /// Mean processing time of completed dispatches, in milliseconds.
    pub average_processing_time: f64,

    pub messages_by_status: BTreeMap<String, u64>,
    pub messages_by_service: BTreeMap<String, u64>,
    pub messages_by_action: BTreeMap<String, u64>,
}

impl QueueStats {
    /// `processed + failed + dead_letter`; never exceeds `total_messages`.
    pub fn finished_messages(&self) -> u64 {
        self.processed_messages + self.failed_messages + self.dead_letter_messages
    }
}
