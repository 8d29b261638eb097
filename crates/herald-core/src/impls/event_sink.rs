//! EventSink 実装
//!
//! - **NoopEventSink**: 何もしない
//! - **LoggingEventSink**: tracing に流す（CLI 用）
//! - **ChannelEventSink**: mpsc に流す（テスト・組み込み用）

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::events::QueueEvent;
use crate::ports::EventSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: QueueEvent) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event: QueueEvent) {
        let elapsed_ms = event.processing_time().as_millis() as u64;
        let message_id = event.envelope().message_id().to_string();
        match &event {
            QueueEvent::Completed { result, .. } => {
                info!(event = event.name(), %message_id, elapsed_ms, %result, "queue event");
            }
            QueueEvent::Error { error, envelope, .. } => {
                warn!(
                    event = event.name(),
                    %message_id,
                    elapsed_ms,
                    status = %envelope.status,
                    code = error.code.as_deref().unwrap_or_default(),
                    error = %error.message,
                    "queue event"
                );
            }
        }
    }
}

/// 受信側が drop されていたら通知は捨てる
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<QueueEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: QueueEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}
