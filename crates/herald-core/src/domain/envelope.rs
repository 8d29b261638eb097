//! Envelope - the unit of work carried through the transport.
//!
//! The JSON shape (camelCase keys, epoch-millisecond timestamps) is the
//! transport payload body, so field names here are part of the wire format.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::QueueError;
use super::ids::{EnvelopeId, MessageId};
use super::state::EnvelopeStatus;

/// Queue used when a payload does not name one.
pub const DEFAULT_QUEUE: &str = "default";

/// Priority used when a request does not set one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Resource identifier forwarded to `get`/`patch`/`remove`/`update`.
///
/// Capabilities key their resources by either numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Number(n) => n.fmt(f),
            ResourceId::Text(s) => s.fmt(f),
        }
    }
}

/// What to invoke and with which arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,

    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ResourceId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_args: Option<Vec<serde_json::Value>>,
}

impl Payload {
    /// Standard operation on a service.
    pub fn action(
        service: impl Into<String>,
        action: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            service: Some(service.into()),
            action: Some(action.into()),
            data,
            ..Self::default()
        }
    }

    /// Named method on a service, called with positional arguments.
    pub fn method(
        service: impl Into<String>,
        method: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            service: Some(service.into()),
            method: Some(method.into()),
            method_args: Some(args),
            ..Self::default()
        }
    }

    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_id(mut self, id: ResourceId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_query(mut self, query: serde_json::Value) -> Self {
        self.query = Some(query);
        self
    }

    pub fn queue_name(&self) -> &str {
        self.queue_name.as_deref().unwrap_or(DEFAULT_QUEUE)
    }

    /// `service` + `action` are required unless a `method` is named.
    pub fn has_target(&self) -> bool {
        let present = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.method) || (present(&self.service) && present(&self.action))
    }
}

/// Lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub message_id: MessageId,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub queue_name: String,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub scheduled_for: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_reason: Option<String>,

    /// Identifier the transport assigned on publish, when it differs from `message_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_message_id: Option<String>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Structured failure attached to an envelope in a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// One retry attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

/// Caller-supplied metadata on a creation request. Every field set here
/// wins over the defaults the publisher would assign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub scheduled_for: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
}

/// "Invoke capability X with arguments Y", as handed to the publisher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub payload: Payload,

    #[serde(default)]
    pub metadata: RequestMetadata,
}

impl CreateRequest {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            metadata: RequestMetadata::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.metadata.priority = Some(priority);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.metadata.scheduled_for = Some(at);
        self
    }

    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.metadata.message_id = Some(message_id);
        self
    }

    /// Queue the request is routed to: `payload.queueName`, then
    /// `metadata.queueName`, then the default queue.
    pub fn queue_name(&self) -> &str {
        self.payload
            .queue_name
            .as_deref()
            .or(self.metadata.queue_name.as_deref())
            .unwrap_or(DEFAULT_QUEUE)
    }
}

/// Values the publisher assigns when the caller did not.
#[derive(Debug, Clone)]
pub struct EnvelopeDefaults {
    pub id: EnvelopeId,
    pub message_id: MessageId,
    pub now: DateTime<Utc>,
    pub max_retries: u32,
}

/// The unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: EnvelopeId,

    #[serde(default)]
    pub status: EnvelopeStatus,

    pub payload: Payload,

    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,

    #[serde(default)]
    pub processing_history: Vec<HistoryEntry>,
}

impl Envelope {
    /// Build a fresh `pending` envelope from a request.
    pub fn from_request(request: CreateRequest, defaults: EnvelopeDefaults) -> Self {
        let CreateRequest {
            mut payload,
            metadata,
        } = request;
        // payload and metadata must agree on the queue used for routing
        if payload.queue_name.is_none() {
            payload.queue_name = metadata.queue_name;
        }
        let queue_name = payload.queue_name().to_string();

        Self {
            id: defaults.id,
            status: EnvelopeStatus::Pending,
            metadata: Metadata {
                message_id: metadata.message_id.unwrap_or(defaults.message_id),
                timestamp: metadata.timestamp.unwrap_or(defaults.now),
                priority: metadata.priority.unwrap_or(DEFAULT_PRIORITY),
                queue_name,
                retry_count: 0,
                max_retries: Some(defaults.max_retries),
                scheduled_for: metadata.scheduled_for,
                dead_letter_reason: None,
                transport_message_id: None,
            },
            payload,
            result: None,
            error: None,
            processing_history: Vec::new(),
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.metadata.message_id
    }

    /// Queue the envelope belongs to (payload wins, as on creation).
    pub fn queue_name(&self) -> &str {
        self.payload.queue_name()
    }

    /// Remaining time until `scheduled_for`, if that is strictly in the future.
    pub fn remaining_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        let at = self.metadata.scheduled_for?;
        if at > now {
            (at - now).to_std().ok()
        } else {
            None
        }
    }

    /// Record one retry attempt and bump the retry counter.
    pub fn record_retry(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.metadata.retry_count += 1;
        self.processing_history.push(HistoryEntry {
            timestamp: now,
            status: "retry".to_string(),
            error: Some(error.into()),
            retry_count: Some(self.metadata.retry_count),
        });
    }

    /// The terminal `DeadLetter` error for an envelope already in `dead-letter`.
    pub fn dead_letter_error(&self) -> Option<QueueError> {
        (self.status == EnvelopeStatus::DeadLetter).then(|| QueueError::DeadLetter {
            message_id: self.metadata.message_id.clone(),
            reason: self
                .metadata
                .dead_letter_reason
                .clone()
                .unwrap_or_else(|| "no reason recorded".to_string()),
        })
    }

    /// Transport attributes: every metadata field, string-encoded.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let m = &self.metadata;
        let mut attrs = BTreeMap::new();
        attrs.insert("messageId".to_string(), m.message_id.to_string());
        attrs.insert(
            "timestamp".to_string(),
            m.timestamp.timestamp_millis().to_string(),
        );
        attrs.insert("priority".to_string(), m.priority.to_string());
        attrs.insert("queueName".to_string(), m.queue_name.clone());
        attrs.insert("retryCount".to_string(), m.retry_count.to_string());
        if let Some(max) = m.max_retries {
            attrs.insert("maxRetries".to_string(), max.to_string());
        }
        if let Some(at) = m.scheduled_for {
            attrs.insert(
                "scheduledFor".to_string(),
                at.timestamp_millis().to_string(),
            );
        }
        if let Some(reason) = &m.dead_letter_reason {
            attrs.insert("deadLetterReason".to_string(), reason.clone());
        }
        attrs
    }

    /// Ordering lane: same-priority messages share a key.
    pub fn ordering_key(&self) -> String {
        self.metadata.priority.to_string()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
