//! Transport port - pub/sub トランスポートの抽象化
//!
//! トランスポート自体（at-least-once 配送、ack/nack、push/pull）は外部の協調者です。
//! コアが使うのは topic / subscription の作成と列挙、publish、購読の登録だけです。
//!
//! # 設計原則
//! - 属性（attributes）の値は文字列のみ
//! - ordering key と schedule time はヒント（対応していないトランスポートは無視してよい）
//! - 配送ごとに MessageHandler が Ack / Nack を返す

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// topic / subscription が存在しない（削除・再作成された可能性）
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

/// publish 時にトランスポートへ渡すメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
    pub ordering_key: Option<String>,
    /// この時刻まで配送を遅らせるヒント
    pub schedule_time: Option<DateTime<Utc>>,
}

/// トランスポートから配送されたメッセージ
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InboundMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
    /// トランスポートが採番した ID
    pub message_id: Option<String>,
}

/// Push 配送の HTTP body: `{"message": {...}, "subscription": "..."}`
#[derive(Debug, Deserialize)]
struct PushBody {
    message: PushMessage,
    #[allow(dead_code)]
    #[serde(default)]
    subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum PushDecodeError {
    #[error("malformed push body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl InboundMessage {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Push 配送の body を decode（`message.data` は base64）
    pub fn from_push_body(body: &[u8]) -> Result<Self, PushDecodeError> {
        let PushBody { message, .. } = serde_json::from_slice(body)?;
        Ok(Self {
            data: STANDARD.decode(message.data.as_bytes())?,
            attributes: message.attributes,
            message_id: message.message_id,
        })
    }
}

/// トランスポート側の dead-letter ポリシー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    pub topic: String,
    pub max_delivery_attempts: u32,
}

/// subscription 作成時のオプション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// 設定されていれば push 配送、なければ pull
    pub push_endpoint: Option<String>,
    pub ack_deadline: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub dead_letter_policy: Option<DeadLetterPolicy>,
    pub max_outstanding_messages: usize,
}

/// 配送結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// 消費済み（再配送しない）
    Ack,
    /// 再配送を要求
    Nack,
}

/// 配送コールバック（`onMessage` / `onError`）
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: InboundMessage) -> AckDecision;

    fn on_error(&self, subscription: &str, error: &TransportError) {
        tracing::error!(subscription, error = %error, "subscription error");
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_topic(&self, name: &str) -> Result<(), TransportError>;

    async fn list_topics(&self) -> Result<Vec<String>, TransportError>;

    async fn create_subscription(
        &self,
        topic: &str,
        name: &str,
        options: &SubscriptionOptions,
    ) -> Result<(), TransportError>;

    async fn list_subscriptions(&self) -> Result<Vec<String>, TransportError>;

    /// 採番されたメッセージ ID を返す
    async fn publish(
        &self,
        topic: &str,
        message: OutboundMessage,
    ) -> Result<String, TransportError>;

    async fn subscribe(
        &self,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError>;
}

/// topic へのハンドル
#[derive(Clone)]
pub struct TopicHandle {
    name: String,
    transport: Arc<dyn Transport>,
}

impl TopicHandle {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn publish(&self, message: OutboundMessage) -> Result<String, TransportError> {
        self.transport.publish(&self.name, message).await
    }
}

impl std::fmt::Debug for TopicHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicHandle").field("name", &self.name).finish()
    }
}

/// subscription へのハンドル
#[derive(Clone)]
pub struct SubscriptionHandle {
    name: String,
    transport: Arc<dyn Transport>,
}

impl SubscriptionHandle {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn on_message(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        self.transport.subscribe(&self.name, handler).await
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("name", &self.name)
            .finish()
    }
}
