//! InMemoryTransport - 開発用・テスト用の pub/sub トランスポート
//!
//! # 学習ポイント
//! - Mutex で topic / subscription / publish 記録を排他制御
//! - 自動配送は tokio::spawn + sleep（schedule time まで待つ）
//! - Nack されたら subscription の min_backoff 後に再配送

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::ports::{
    AckDecision, InboundMessage, MessageHandler, OutboundMessage, SubscriptionOptions, Transport,
    TransportError,
};

/// Nack 時の再配送回数の上限（dead-letter policy がない subscription 用）
const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// publish の記録
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub id: String,
    pub message: OutboundMessage,
}

struct SubscriptionState {
    topic: String,
    options: SubscriptionOptions,
    handler: Option<Arc<dyn MessageHandler>>,
}

#[derive(Default)]
struct State {
    topics: BTreeSet<String>,
    subscriptions: BTreeMap<String, SubscriptionState>,
    published: Vec<PublishedMessage>,
    topic_creations: Vec<String>,
    subscription_creations: Vec<String>,
    failing_publishes: u32,
    next_id: u64,
}

/// 配送先（subscription 名 + handler + オプション）
struct Target {
    subscription: String,
    handler: Arc<dyn MessageHandler>,
    options: SubscriptionOptions,
}

/// InMemoryTransport はプロセス内で完結する Transport 実装
///
/// # 実装詳細
/// - publish はすべて記録される（テストで topic / attributes / ordering key / schedule time を検証）
/// - `fail_next_publishes(n)` で publish 失敗を注入
/// - `delete_topic` で topic の消失（再作成）を再現
/// - `with_auto_delivery()` の場合、publish されたメッセージを購読 handler へ配送
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<State>>,
    auto_deliver: bool,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// publish を購読中の handler へ自動配送する
    pub fn with_auto_delivery() -> Self {
        Self {
            state: Arc::default(),
            auto_deliver: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// 次の `n` 回の publish を `Unavailable` で失敗させる
    pub fn fail_next_publishes(&self, n: u32) {
        self.lock().failing_publishes = n;
    }

    pub fn delete_topic(&self, name: &str) {
        self.lock().topics.remove(name);
    }

    /// create_topic が呼ばれた topic 名（呼ばれた順）
    pub fn topic_creations(&self) -> Vec<String> {
        self.lock().topic_creations.clone()
    }

    pub fn subscription_creations(&self) -> Vec<String> {
        self.lock().subscription_creations.clone()
    }

    pub fn subscription_options(&self, name: &str) -> Option<SubscriptionOptions> {
        self.lock()
            .subscriptions
            .get(name)
            .map(|s| s.options.clone())
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.lock()
            .subscriptions
            .get(name)
            .is_some_and(|s| s.handler.is_some())
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// publish を記録し、配送先を返す
fn record_publish(
    state: &Mutex<State>,
    topic: &str,
    message: &OutboundMessage,
) -> Result<(String, Vec<Target>), TransportError> {
    let mut state = lock(state);

    if state.failing_publishes > 0 {
        state.failing_publishes -= 1;
        return Err(TransportError::Unavailable("injected publish failure".to_string()));
    }
    if !state.topics.contains(topic) {
        return Err(TransportError::NotFound(format!("topic {topic}")));
    }

    state.next_id += 1;
    let id = state.next_id.to_string();
    state.published.push(PublishedMessage {
        topic: topic.to_string(),
        id: id.clone(),
        message: message.clone(),
    });

    let targets = state
        .subscriptions
        .iter()
        .filter(|(_, s)| s.topic == topic)
        .filter_map(|(name, s)| {
            s.handler.as_ref().map(|handler| Target {
                subscription: name.clone(),
                handler: handler.clone(),
                options: s.options.clone(),
            })
        })
        .collect();

    Ok((id, targets))
}

fn spawn_deliveries(state: Arc<Mutex<State>>, id: String, message: OutboundMessage, targets: Vec<Target>) {
    for target in targets {
        let state = state.clone();
        let inbound = InboundMessage {
            data: message.data.clone(),
            attributes: message.attributes.clone(),
            message_id: Some(id.clone()),
        };
        let delay = message
            .schedule_time
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .unwrap_or_default();
        tokio::spawn(deliver(state, target, inbound, delay));
    }
}

async fn deliver(state: Arc<Mutex<State>>, target: Target, message: InboundMessage, delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let max_attempts = target
        .options
        .dead_letter_policy
        .as_ref()
        .map(|p| p.max_delivery_attempts)
        .unwrap_or(DEFAULT_MAX_DELIVERY_ATTEMPTS)
        .max(1);

    for attempt in 1..=max_attempts {
        match target.handler.on_message(message.clone()).await {
            AckDecision::Ack => return,
            AckDecision::Nack => {
                debug!(subscription = %target.subscription, attempt, "delivery nacked");
                tokio::time::sleep(target.options.min_backoff).await;
            }
        }
    }

    let Some(policy) = &target.options.dead_letter_policy else {
        warn!(subscription = %target.subscription, "delivery attempts exhausted, dropping message");
        return;
    };

    let outbound = OutboundMessage {
        data: message.data,
        attributes: message.attributes,
        ordering_key: None,
        schedule_time: None,
    };
    match record_publish(&state, &policy.topic, &outbound) {
        Ok((id, targets)) => spawn_deliveries(state.clone(), id, outbound, targets),
        Err(error) => target.handler.on_error(&target.subscription, &error),
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn create_topic(&self, name: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.topic_creations.push(name.to_string());
        if !state.topics.insert(name.to_string()) {
            return Err(TransportError::AlreadyExists(format!("topic {name}")));
        }
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.lock().topics.iter().cloned().collect())
    }

    async fn create_subscription(
        &self,
        topic: &str,
        name: &str,
        options: &SubscriptionOptions,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.subscription_creations.push(name.to_string());
        if !state.topics.contains(topic) {
            return Err(TransportError::NotFound(format!("topic {topic}")));
        }
        if state.subscriptions.contains_key(name) {
            return Err(TransportError::AlreadyExists(format!("subscription {name}")));
        }
        state.subscriptions.insert(
            name.to_string(),
            SubscriptionState {
                topic: topic.to_string(),
                options: options.clone(),
                handler: None,
            },
        );
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.lock().subscriptions.keys().cloned().collect())
    }

    async fn publish(
        &self,
        topic: &str,
        message: OutboundMessage,
    ) -> Result<String, TransportError> {
        let (id, targets) = record_publish(&self.state, topic, &message)?;
        if self.auto_deliver {
            spawn_deliveries(self.state.clone(), id.clone(), message, targets);
        }
        Ok(id)
    }

    async fn subscribe(
        &self,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        let sub = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| TransportError::NotFound(format!("subscription {subscription}")))?;
        sub.handler = Some(handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::DeadLetterPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    fn options() -> SubscriptionOptions {
        SubscriptionOptions {
            push_endpoint: None,
            ack_deadline: Duration::from_secs(30),
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            dead_letter_policy: None,
            max_outstanding_messages: 10,
        }
    }

    fn message(body: &str) -> OutboundMessage {
        OutboundMessage {
            data: body.as_bytes().to_vec(),
            attributes: BTreeMap::from([("priority".to_string(), "5".to_string())]),
            ordering_key: Some("5".to_string()),
            schedule_time: None,
        }
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<InboundMessage>,
        nacks_left: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn on_message(&self, message: InboundMessage) -> AckDecision {
            let _ = self.tx.send(message);
            if self.nacks_left.load(Ordering::SeqCst) > 0 {
                self.nacks_left.fetch_sub(1, Ordering::SeqCst);
                return AckDecision::Nack;
            }
            AckDecision::Ack
        }
    }

    #[tokio::test]
    async fn publish_is_recorded_with_sequential_ids() {
        let transport = InMemoryTransport::new();
        transport.create_topic("t").await.unwrap();

        let first = transport.publish("t", message("a")).await.unwrap();
        let second = transport.publish("t", message("b")).await.unwrap();

        assert_eq!(first, "1");
        assert_eq!(second, "2");
        let published = transport.published_to("t");
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].message.ordering_key.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn publish_to_missing_topic_is_not_found() {
        let transport = InMemoryTransport::new();
        transport.create_topic("t").await.unwrap();
        transport.delete_topic("t");

        let err = transport.publish("t", message("a")).await.unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let transport = InMemoryTransport::new();
        transport.create_topic("t").await.unwrap();
        transport.fail_next_publishes(1);

        assert!(matches!(
            transport.publish("t", message("a")).await,
            Err(TransportError::Unavailable(_))
        ));
        assert!(transport.publish("t", message("a")).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_creation_is_reported() {
        let transport = InMemoryTransport::new();
        transport.create_topic("t").await.unwrap();
        assert!(matches!(
            transport.create_topic("t").await,
            Err(TransportError::AlreadyExists(_))
        ));

        transport.create_subscription("t", "s", &options()).await.unwrap();
        assert!(matches!(
            transport.create_subscription("t", "s", &options()).await,
            Err(TransportError::AlreadyExists(_))
        ));
        assert_eq!(transport.list_subscriptions().await.unwrap(), vec!["s"]);
    }

    #[tokio::test]
    async fn auto_delivery_reaches_subscriber_and_redelivers_on_nack() {
        let transport = InMemoryTransport::with_auto_delivery();
        transport.create_topic("t").await.unwrap();
        transport.create_subscription("t", "s", &options()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport
            .subscribe(
                "s",
                Arc::new(Recorder {
                    tx,
                    nacks_left: AtomicU32::new(1),
                }),
            )
            .await
            .unwrap();
        assert!(transport.is_subscribed("s"));

        transport.publish("t", message("hello")).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.data, b"hello");
        assert_eq!(first.message_id.as_deref(), Some("1"));
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn exhausted_deliveries_go_to_dead_letter_topic() {
        let transport = InMemoryTransport::with_auto_delivery();
        transport.create_topic("t").await.unwrap();
        transport.create_topic("dlq").await.unwrap();
        let opts = SubscriptionOptions {
            dead_letter_policy: Some(DeadLetterPolicy {
                topic: "dlq".to_string(),
                max_delivery_attempts: 2,
            }),
            ..options()
        };
        transport.create_subscription("t", "s", &opts).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport
            .subscribe(
                "s",
                Arc::new(Recorder {
                    tx,
                    nacks_left: AtomicU32::new(u32::MAX),
                }),
            )
            .await
            .unwrap();

        transport.publish("t", message("poison")).await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        for _ in 0..50 {
            if !transport.published_to("dlq").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let dead = transport.published_to("dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.data, b"poison");
    }
}
