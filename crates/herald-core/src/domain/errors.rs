//! Errors - エラー型と分類
//!
//! `QueueError` は publish 側（同期的に呼び出し元へ返す）と
//! dispatch 側（RetryController が回収する）の両方の失敗を表現します。
//! wire 上では `ErrorCode` の文字列として記録されます。

use std::error::Error as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::action::Action;
use super::envelope::FailureDetail;
use super::ids::MessageId;
use crate::ports::{CapabilityError, TransportError};

/// Stable failure codes recorded on envelopes and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    QueueNotConfigured,
    InvalidQueueConfig,
    PublishFailed,
    ServiceNotFound,
    MethodNotFound,
    InvalidAction,
    MissingId,
    ProcessingError,
    Timeout,
    DecodeError,
    DeadLetter,
    Unsupported,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::QueueNotConfigured => "QUEUE_NOT_CONFIGURED",
            ErrorCode::InvalidQueueConfig => "INVALID_QUEUE_CONFIG",
            ErrorCode::PublishFailed => "PUBLISH_FAILED",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::InvalidAction => "INVALID_ACTION",
            ErrorCode::MissingId => "MISSING_ID",
            ErrorCode::ProcessingError => "PROCESSING_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DecodeError => "DECODE_ERROR",
            ErrorCode::DeadLetter => "DEAD_LETTER",
            ErrorCode::Unsupported => "UNSUPPORTED",
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid queue message: {0}")]
    Validation(String),

    #[error("queue '{0}' is not configured")]
    QueueNotConfigured(String),

    #[error("invalid configuration for queue '{queue}': {reason}")]
    InvalidQueueConfig { queue: String, reason: String },

    #[error("failed to publish message {message_id} to queue '{queue}'")]
    Publish {
        queue: String,
        message_id: MessageId,
        #[source]
        source: TransportError,
    },

    #[error("failed to bind queue '{queue}'")]
    Binding {
        queue: String,
        #[source]
        source: TransportError,
    },

    #[error("service '{0}' not found")]
    ServiceNotFound(String),

    #[error("method '{method}' not found on service '{service}'")]
    MethodNotFound { service: String, method: String },

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("id is required for {0} operation")]
    MissingId(Action),

    #[error(transparent)]
    Processing(#[from] CapabilityError),

    #[error("dispatch did not finish within {0:?}")]
    Timeout(Duration),

    #[error("invalid envelope JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("message {message_id} is dead-lettered: {reason}")]
    DeadLetter {
        message_id: MessageId,
        reason: String,
    },

    #[error("{0}")]
    Unsupported(&'static str),
}

impl QueueError {
    pub fn code(&self) -> ErrorCode {
        match self {
            QueueError::Validation(_) => ErrorCode::ValidationError,
            QueueError::QueueNotConfigured(_) => ErrorCode::QueueNotConfigured,
            QueueError::InvalidQueueConfig { .. } => ErrorCode::InvalidQueueConfig,
            QueueError::Publish { .. } | QueueError::Binding { .. } => ErrorCode::PublishFailed,
            QueueError::ServiceNotFound(_) => ErrorCode::ServiceNotFound,
            QueueError::MethodNotFound { .. } => ErrorCode::MethodNotFound,
            QueueError::InvalidAction(_) => ErrorCode::InvalidAction,
            QueueError::MissingId(_) => ErrorCode::MissingId,
            QueueError::Processing(_) => ErrorCode::ProcessingError,
            QueueError::Timeout(_) => ErrorCode::Timeout,
            QueueError::Decode(_) => ErrorCode::DecodeError,
            QueueError::DeadLetter { .. } => ErrorCode::DeadLetter,
            QueueError::Unsupported(_) => ErrorCode::Unsupported,
        }
    }

    /// Capture this failure in the envelope's `error` shape.
    ///
    /// A capability may carry its own code and details; those win.
    pub fn to_failure(&self) -> FailureDetail {
        let (code, details) = match self {
            QueueError::Processing(cap) => (
                cap.code
                    .clone()
                    .unwrap_or_else(|| ErrorCode::ProcessingError.as_str().to_string()),
                cap.details.clone(),
            ),
            other => (other.code().as_str().to_string(), None),
        };

        FailureDetail {
            code: Some(code),
            message: self.to_string(),
            details,
            stack: Some(self.source_chain()),
        }
    }

    /// `Display` of this error followed by every `source()`, one per line.
    fn source_chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut cur = self.source();
        while let Some(err) = cur {
            chain.push(format!("caused by: {err}"));
            cur = err.source();
        }
        chain.join("\n")
    }
}
