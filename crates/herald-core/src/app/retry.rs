//! RetryController - ディスパッチ結果の後始末
//!
//! # 状態遷移
//! - 成功: completed（result を記録、`queue:completed` を通知）
//! - 失敗・リトライ残りあり: retry 履歴を追加して pending で再 publish（scheduled_for = now + delay）
//! - 失敗・リトライ切れ: dead-letter topic へ publish して dead-letter、なければ failed
//!   （error を付けて `queue:error` を通知）
//!
//! 回復の判断をするのはこのコンポーネントだけです。判断そのものは Decider に委譲します。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use super::publisher::Publisher;
use super::stats::StatsAggregator;
use crate::config::QueueConfig;
use crate::domain::decision::{Decider, Decision};
use crate::domain::envelope::Envelope;
use crate::domain::errors::QueueError;
use crate::domain::events::QueueEvent;
use crate::domain::state::EnvelopeStatus;
use crate::ports::{Clock, EventSink};

/// ディスパッチ 1 回分の結末
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Rescheduled { delay: Duration, retry_count: u32 },
    DeadLettered,
    Failed,
}

pub struct RetryController {
    publisher: Arc<Publisher>,
    decider: Arc<dyn Decider>,
    stats: Arc<StatsAggregator>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl RetryController {
    pub fn new(
        publisher: Arc<Publisher>,
        decider: Arc<dyn Decider>,
        stats: Arc<StatsAggregator>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            publisher,
            decider,
            stats,
            events,
            clock,
        }
    }

    pub fn on_success(&self, mut envelope: Envelope, result: Value, elapsed: Duration) -> Outcome {
        envelope.status = EnvelopeStatus::Completed;
        envelope.result = Some(result.clone());
        self.stats.record(&envelope, elapsed);

        info!(
            message_id = %envelope.message_id(),
            elapsed_ms = elapsed.as_millis() as u64,
            "message completed"
        );
        self.events.emit(QueueEvent::Completed {
            envelope,
            result,
            processing_time: elapsed,
        });
        Outcome::Completed
    }

    /// 失敗を処理する
    ///
    /// `Err` は再 publish / dead-letter publish に失敗したこと（まだ結末を引き受けていない）を表す。
    pub async fn on_failure(
        &self,
        mut envelope: Envelope,
        failure: QueueError,
        config: &QueueConfig,
        elapsed: Duration,
    ) -> Result<Outcome, QueueError> {
        match self.decider.decide(&envelope, config) {
            Decision::Retry { delay } => {
                let now = self.clock.now();
                envelope.record_retry(now, failure.to_string());
                envelope.metadata.scheduled_for = Some(due_at(now, delay));
                envelope.status = EnvelopeStatus::Pending;

                self.publisher.reschedule(&envelope).await?;
                self.stats.record(&envelope, elapsed);

                let retry_count = envelope.metadata.retry_count;
                warn!(
                    message_id = %envelope.message_id(),
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "dispatch failed, retry scheduled"
                );
                Ok(Outcome::Rescheduled { delay, retry_count })
            }
            Decision::DeadLetter { reason } => {
                envelope.status = EnvelopeStatus::DeadLetter;
                envelope.metadata.dead_letter_reason = Some(reason);
                self.publisher.publish_dead_letter(&envelope).await?;

                error!(
                    message_id = %envelope.message_id(),
                    retry_count = envelope.metadata.retry_count,
                    error = %failure,
                    "message dead-lettered"
                );
                self.finalize(envelope, &failure, elapsed);
                Ok(Outcome::DeadLettered)
            }
            Decision::Fail { reason } => {
                envelope.status = EnvelopeStatus::Failed;

                error!(
                    message_id = %envelope.message_id(),
                    %reason,
                    error = %failure,
                    "message failed"
                );
                self.finalize(envelope, &failure, elapsed);
                Ok(Outcome::Failed)
            }
        }
    }

    fn finalize(&self, mut envelope: Envelope, failure: &QueueError, elapsed: Duration) {
        let detail = failure.to_failure();
        envelope.error = Some(detail.clone());
        self.stats.record(&envelope, elapsed);
        self.events.emit(QueueEvent::Error {
            envelope,
            error: detail,
            processing_time: elapsed,
        });
    }
}

fn due_at(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
