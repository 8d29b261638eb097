//! StatsAggregator - プロセス全体の集計
//!
//! 並行ディスパッチのすべてから更新されるので Mutex で保護します。
//! リセット操作はありません（寿命 = プロセスの寿命）。

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::envelope::Envelope;
use crate::domain::state::EnvelopeStatus;
use crate::domain::stats::QueueStats;

const UNKNOWN: &str = "unknown";

#[derive(Debug, Default)]
pub struct StatsAggregator {
    stats: Mutex<QueueStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Envelope の現在の status で 1 件記録する
    pub fn record(&self, envelope: &Envelope, processing_time: Duration) {
        let service = envelope.payload.service.as_deref().unwrap_or(UNKNOWN);
        // named method は method 名で集計する
        let action = envelope
            .payload
            .method
            .as_deref()
            .or(envelope.payload.action.as_deref())
            .unwrap_or(UNKNOWN);

        let mut stats = self.lock();
        stats.total_messages += 1;
        *stats
            .messages_by_status
            .entry(envelope.status.as_str().to_string())
            .or_default() += 1;
        *stats
            .messages_by_service
            .entry(service.to_string())
            .or_default() += 1;
        *stats
            .messages_by_action
            .entry(action.to_string())
            .or_default() += 1;

        match envelope.status {
            EnvelopeStatus::Completed => {
                stats.processed_messages += 1;
                // incremental mean over completed dispatches
                let n = stats.processed_messages as f64;
                let sample = processing_time.as_secs_f64() * 1_000.0;
                stats.average_processing_time += (sample - stats.average_processing_time) / n;
            }
            EnvelopeStatus::Failed => stats.failed_messages += 1,
            EnvelopeStatus::DeadLetter => stats.dead_letter_messages += 1,
            EnvelopeStatus::Pending | EnvelopeStatus::Processing => {}
        }
    }

    pub fn snapshot(&self) -> QueueStats {
        self.lock().clone()
    }
}
