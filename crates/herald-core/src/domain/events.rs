//! Events - アプリケーション境界への通知
//!
//! コア自身はこれらを消費しません。外部の監視系が EventSink 経由で受け取ります。

use std::time::Duration;

use super::envelope::{Envelope, FailureDetail};

pub const COMPLETED: &str = "queue:completed";
pub const ERROR: &str = "queue:error";

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// Dispatch succeeded.
    Completed {
        envelope: Envelope,
        result: serde_json::Value,
        processing_time: Duration,
    },

    /// Retries exhausted; the envelope is `failed` or `dead-letter`.
    Error {
        envelope: Envelope,
        error: FailureDetail,
        processing_time: Duration,
    },
}

impl QueueEvent {
    /// Event name as seen by the application boundary.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Completed { .. } => COMPLETED,
            QueueEvent::Error { .. } => ERROR,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        match self {
            QueueEvent::Completed { envelope, .. } | QueueEvent::Error { envelope, .. } => envelope,
        }
    }

    pub fn processing_time(&self) -> Duration {
        match self {
            QueueEvent::Completed {
                processing_time, ..
            }
            | QueueEvent::Error {
                processing_time, ..
            } => *processing_time,
        }
    }
}
