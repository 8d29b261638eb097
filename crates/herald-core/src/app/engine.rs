//! QueueEngine / EngineBuilder - 構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 期待するサービスが未登録なら build() が失敗する
//! - 共有状態（InFlightGuard, Stats）は Arc / Clone で明示的に配る

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::OnceCell;
use tracing::info;

use super::connections::ConnectionManager;
use super::dispatcher::ActionDispatcher;
use super::guard::InFlightGuard;
use super::listener::DeliveryListener;
use super::publisher::Publisher;
use super::retry::RetryController;
use super::stats::StatsAggregator;
use crate::config::{ConfigError, QueueRegistry, QueuesConfig};
use crate::domain::decision::{Decider, DefaultDecider};
use crate::domain::envelope::{CreateRequest, Envelope};
use crate::domain::errors::QueueError;
use crate::domain::stats::QueueStats;
use crate::impls::{NoopEventSink, RegistryError, ServiceRegistry};
use crate::ports::{
    Capability, Clock, EventSink, IdGenerator, SystemClock, Transport, UlidGenerator,
};

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing services: {0:?}. These services were expected but not registered.")]
    MissingServices(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// EngineBuilder はエンジンを構築
///
/// # 使用例
/// ```ignore
/// let engine = QueueEngine::builder(config, transport)
///     .register("users", Arc::new(UsersService))?
///     .expect_services(&["users"])
///     .build()?;
/// engine.setup().await?;
/// ```
pub struct EngineBuilder {
    config: QueuesConfig,
    transport: Arc<dyn Transport>,
    services: ServiceRegistry,
    expected_services: Option<Vec<String>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Arc<dyn Decider>,
    events: Arc<dyn EventSink>,
}

impl EngineBuilder {
    pub fn new(config: QueuesConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            services: ServiceRegistry::new(),
            expected_services: None,
            clock: Arc::new(SystemClock),
            ids: None,
            decider: Arc::new(DefaultDecider),
            events: Arc::new(NoopEventSink),
        }
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) -> Result<Self, RegistryError> {
        self.services.register(name, capability)?;
        Ok(self)
    }

    /// build() 時に登録済みであることを要求するサービス名
    pub fn expect_services(mut self, names: &[&str]) -> Self {
        self.expected_services = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// # 検証
    /// - キューが 1 つもなければ ConfigError::NoQueues
    /// - expect_services() で設定されたサービスが全て登録されているかチェック
    pub fn build(self) -> Result<QueueEngine, BuildError> {
        if let Some(expected) = &self.expected_services {
            let registered = self.services.registered_services();
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !registered.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingServices(missing));
            }
        }

        let registry = Arc::new(QueueRegistry::new(self.config)?);
        let connections = Arc::new(ConnectionManager::new(registry.clone(), self.transport));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(self.clock.clone())));
        let publisher = Arc::new(Publisher::new(
            connections.clone(),
            self.clock.clone(),
            ids,
        ));
        let stats = Arc::new(StatsAggregator::new());
        let controller = Arc::new(RetryController::new(
            publisher.clone(),
            self.decider,
            stats.clone(),
            self.events,
            self.clock.clone(),
        ));

        Ok(QueueEngine {
            registry,
            connections,
            publisher,
            dispatcher: Arc::new(ActionDispatcher::new(Arc::new(self.services))),
            controller,
            guard: InFlightGuard::new(),
            stats,
            clock: self.clock,
            listening: DashSet::new(),
            ready: OnceCell::new(),
        })
    }
}

/// QueueEngine はキュー処理のランタイム
///
/// 呼び出し側の入口は `create()`、トランスポート側の入口は `setup()` で登録される DeliveryListener。
pub struct QueueEngine {
    registry: Arc<QueueRegistry>,
    connections: Arc<ConnectionManager>,
    publisher: Arc<Publisher>,
    dispatcher: Arc<ActionDispatcher>,
    controller: Arc<RetryController>,
    guard: InFlightGuard,
    stats: Arc<StatsAggregator>,
    clock: Arc<dyn Clock>,
    /// listener 登録済みのキュー名（setup が途中で失敗しても二重登録しない）
    listening: DashSet<String>,
    ready: OnceCell<()>,
}

impl QueueEngine {
    pub fn builder(config: QueuesConfig, transport: Arc<dyn Transport>) -> EngineBuilder {
        EngineBuilder::new(config, transport)
    }

    /// 全キューを結線し、各 subscription に DeliveryListener を登録する（2 回目以降は何もしない）
    ///
    /// 途中で失敗した場合は再度呼べば残りのキューだけを登録する。
    pub async fn setup(&self) -> Result<(), QueueError> {
        self.ready
            .get_or_try_init(|| async {
                for name in self.registry.names() {
                    if self.listening.contains(name) {
                        continue;
                    }
                    let connection = self.connections.connection(name).await?;
                    let listener = self.listener(name)?;
                    connection
                        .subscription
                        .on_message(listener)
                        .await
                        .map_err(|source| QueueError::Binding {
                            queue: name.to_string(),
                            source,
                        })?;
                    self.listening.insert(name.to_string());
                    info!(
                        queue = name,
                        subscription = connection.subscription.name(),
                        "listening"
                    );
                }
                Ok::<(), QueueError>(())
            })
            .await
            .map(|_| ())
    }

    /// キュー `name` 用の listener（InFlightGuard は共有）
    pub fn listener(&self, name: &str) -> Result<Arc<DeliveryListener>, QueueError> {
        Ok(Arc::new(DeliveryListener::new(
            self.registry.resolve(name)?,
            self.guard.clone(),
            self.dispatcher.clone(),
            self.controller.clone(),
            self.publisher.clone(),
            self.clock.clone(),
        )))
    }

    pub async fn create(&self, request: CreateRequest) -> Result<Envelope, QueueError> {
        self.publisher.create(request).await
    }

    /// 処理履歴は保持しないので常に空
    pub async fn find(&self) -> Vec<Envelope> {
        Vec::new()
    }

    pub async fn get(&self, _id: &str) -> Result<Envelope, QueueError> {
        Err(QueueError::Unsupported(
            "get is not supported: messages are not stored after publishing",
        ))
    }

    pub async fn patch(&self, _id: &str) -> Result<Envelope, QueueError> {
        Err(QueueError::Unsupported(
            "patch is not supported: published messages are immutable",
        ))
    }

    pub async fn remove(&self, _id: &str) -> Result<Envelope, QueueError> {
        Err(QueueError::Unsupported(
            "remove is not supported: published messages cannot be withdrawn",
        ))
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.snapshot()
    }

    pub fn in_flight(&self) -> usize {
        self.guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::domain::decision::MAX_RETRIES_EXCEEDED;
    use crate::domain::envelope::Payload;
    use crate::domain::events::QueueEvent;
    use crate::domain::state::EnvelopeStatus;
    use crate::impls::{ChannelEventSink, InMemoryTransport};
    use crate::ports::{
        AckDecision, CapabilityError, CapabilityResult, FixedClock, InboundMessage, MessageHandler,
        OutboundMessage, SubscriptionOptions, TransportError,
    };
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::{Value, json};
    use std::time::Duration;

    struct Users {
        fail: bool,
    }

    #[async_trait]
    impl Capability for Users {
        async fn create(&self, data: Value, _params: Option<Value>) -> CapabilityResult {
            if self.fail {
                return Err(CapabilityError::new("smtp down").with_code("SMTP_UNAVAILABLE"));
            }
            Ok(json!({"welcomed": data["userId"]}))
        }
    }

    fn config() -> QueuesConfig {
        QueuesConfig::default()
            .with_queue(
                "default",
                QueueConfig::bound("default-topic", "default-sub").with_dead_letter("default-dlq"),
            )
            .with_queue("delayed-tasks", QueueConfig::bound("delayed-topic", "delayed-sub"))
    }

    fn last_published(transport: &InMemoryTransport, topic: &str) -> InboundMessage {
        let last = transport.published_to(topic).pop().unwrap();
        InboundMessage {
            data: last.message.data,
            attributes: last.message.attributes,
            message_id: Some(last.id),
        }
    }

    #[test]
    fn build_fails_on_missing_services() {
        let engine = QueueEngine::builder(config(), Arc::new(InMemoryTransport::new()))
            .register("users", Arc::new(Users { fail: false }))
            .unwrap()
            .expect_services(&["users", "mailer"])
            .build();
        assert!(matches!(
            engine,
            Err(BuildError::MissingServices(missing)) if missing == vec!["mailer".to_string()]
        ));
    }

    #[test]
    fn build_fails_without_queues() {
        let engine = QueueEngine::builder(QueuesConfig::default(), Arc::new(InMemoryTransport::new())).build();
        assert!(matches!(engine, Err(BuildError::Config(ConfigError::NoQueues))));
    }

    #[test]
    fn duplicate_service_registration_is_rejected() {
        let result = QueueEngine::builder(config(), Arc::new(InMemoryTransport::new()))
            .register("users", Arc::new(Users { fail: false }))
            .unwrap()
            .register("users", Arc::new(Users { fail: true }));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn setup_binds_every_queue_once() {
        let transport = InMemoryTransport::new();
        let engine = QueueEngine::builder(config(), Arc::new(transport.clone()))
            .build()
            .unwrap();

        engine.setup().await.unwrap();
        engine.setup().await.unwrap();

        assert!(transport.is_subscribed("default-sub"));
        assert!(transport.is_subscribed("delayed-sub"));
        assert_eq!(transport.subscription_creations().len(), 2);
    }

    /// 指定した subscription への最初の subscribe だけ失敗させる
    struct FlakySubscribe {
        inner: InMemoryTransport,
        fail_once: String,
        subscribes: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for FlakySubscribe {
        async fn create_topic(&self, name: &str) -> Result<(), TransportError> {
            self.inner.create_topic(name).await
        }

        async fn list_topics(&self) -> Result<Vec<String>, TransportError> {
            self.inner.list_topics().await
        }

        async fn create_subscription(
            &self,
            topic: &str,
            name: &str,
            options: &SubscriptionOptions,
        ) -> Result<(), TransportError> {
            self.inner.create_subscription(topic, name, options).await
        }

        async fn list_subscriptions(&self) -> Result<Vec<String>, TransportError> {
            self.inner.list_subscriptions().await
        }

        async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<String, TransportError> {
            self.inner.publish(topic, message).await
        }

        async fn subscribe(
            &self,
            subscription: &str,
            handler: Arc<dyn MessageHandler>,
        ) -> Result<(), TransportError> {
            let first = {
                let mut calls = self.subscribes.lock().unwrap();
                calls.push(subscription.to_string());
                calls.iter().filter(|s| *s == subscription).count() == 1
            };
            if first && subscription == self.fail_once {
                return Err(TransportError::Unavailable("subscribe".to_string()));
            }
            self.inner.subscribe(subscription, handler).await
        }
    }

    #[tokio::test]
    async fn setup_retry_after_partial_failure_subscribes_each_queue_once() {
        let transport = Arc::new(FlakySubscribe {
            inner: InMemoryTransport::new(),
            fail_once: "delayed-sub".to_string(),
            subscribes: std::sync::Mutex::new(Vec::new()),
        });
        let engine = QueueEngine::builder(config(), transport.clone()).build().unwrap();

        let err = engine.setup().await.unwrap_err();
        assert!(matches!(err, QueueError::Binding { ref queue, .. } if queue == "delayed-tasks"));
        assert!(transport.inner.is_subscribed("default-sub"));

        engine.setup().await.unwrap();
        engine.setup().await.unwrap();
        assert_eq!(
            *transport.subscribes.lock().unwrap(),
            vec!["default-sub", "delayed-sub", "delayed-sub"]
        );
        assert!(transport.inner.is_subscribed("delayed-sub"));
    }

    #[tokio::test]
    async fn read_surface_is_unsupported() {
        let engine = QueueEngine::builder(config(), Arc::new(InMemoryTransport::new()))
            .build()
            .unwrap();

        assert!(engine.find().await.is_empty());
        for result in [
            engine.get("x").await,
            engine.patch("x").await,
            engine.remove("x").await,
        ] {
            let err = result.unwrap_err();
            assert_eq!(err.code().as_str(), "UNSUPPORTED");
        }
    }

    #[tokio::test]
    async fn failing_dispatch_backs_off_then_dead_letters() {
        let transport = InMemoryTransport::new();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap()));
        let (sink, mut events) = ChannelEventSink::new();
        let engine = QueueEngine::builder(config(), Arc::new(transport.clone()))
            .register("users", Arc::new(Users { fail: true }))
            .unwrap()
            .with_clock(clock.clone())
            .with_event_sink(Arc::new(sink))
            .build()
            .unwrap();
        let listener = engine.listener("default").unwrap();

        let created = engine
            .create(CreateRequest::new(Payload::action(
                "users",
                "create",
                json!({"userId": "123"}),
            )))
            .await
            .unwrap();

        let mut delays = Vec::new();
        loop {
            let message = last_published(&transport, "default-topic");
            let body = Envelope::from_slice(&message.data).unwrap();
            if let Some(at) = body.metadata.scheduled_for {
                delays.push((at - clock.now()).num_milliseconds());
                clock.set(at);
            }
            assert_eq!(listener.handle(message).await, AckDecision::Ack);
            if !transport.published_to("default-dlq").is_empty() {
                break;
            }
            assert!(delays.len() <= 3, "too many retries");
        }

        assert_eq!(delays, vec![1_000, 2_000, 4_000]);
        assert_eq!(transport.published_to("default-topic").len(), 4);
        assert_eq!(transport.published_to("default-dlq").len(), 1);

        let QueueEvent::Error {
            envelope, error, ..
        } = events.recv().await.unwrap()
        else {
            panic!("expected queue:error");
        };
        assert_eq!(envelope.message_id(), created.message_id());
        assert_eq!(envelope.status, EnvelopeStatus::DeadLetter);
        assert_eq!(
            envelope.metadata.dead_letter_reason.as_deref(),
            Some(MAX_RETRIES_EXCEEDED)
        );
        assert_eq!(envelope.metadata.retry_count, 3);
        assert_eq!(envelope.processing_history.len(), 3);
        assert_eq!(error.code.as_deref(), Some("SMTP_UNAVAILABLE"));

        let stats = engine.stats();
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.dead_letter_messages, 1);
        assert_eq!(stats.messages_by_status["pending"], 3);
        assert_eq!(stats.messages_by_service["users"], 4);
        assert!(stats.finished_messages() <= stats.total_messages);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn auto_delivered_message_completes() {
        let transport = InMemoryTransport::with_auto_delivery();
        let (sink, mut events) = ChannelEventSink::new();
        let engine = QueueEngine::builder(config(), Arc::new(transport.clone()))
            .register("users", Arc::new(Users { fail: false }))
            .unwrap()
            .expect_services(&["users"])
            .with_event_sink(Arc::new(sink))
            .build()
            .unwrap();
        engine.setup().await.unwrap();

        let created = engine
            .create(CreateRequest::new(
                Payload::action("users", "create", json!({"userId": "123"})).with_queue("delayed-tasks"),
            ))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let QueueEvent::Completed {
            envelope, result, ..
        } = event
        else {
            panic!("expected queue:completed");
        };
        assert_eq!(envelope.message_id(), created.message_id());
        assert_eq!(envelope.status, EnvelopeStatus::Completed);
        assert_eq!(result, json!({"welcomed": "123"}));
        assert_eq!(engine.stats().processed_messages, 1);
    }
}
