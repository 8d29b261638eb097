//! ConnectionManager - キュー名ごとのトランスポート結線
//!
//! # 学習ポイント
//! - DashMap + tokio::sync::OnceCell で「キュー名ごとに一度だけ」初期化
//! - 同じキューへの同時初回アクセスは 1 つの QueueConnection を共有する
//! - topic が消えたら rebind で新しいハンドルに差し替える

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::{QueueRegistry, ResolvedQueue};
use crate::domain::errors::QueueError;
use crate::ports::{SubscriptionHandle, TopicHandle, Transport, TransportError};

/// QueueConfig を実際のトランスポートハンドルに結びつけたもの
#[derive(Debug)]
pub struct QueueConnection {
    pub queue: ResolvedQueue,
    pub topic: TopicHandle,
    pub subscription: SubscriptionHandle,
    pub dead_letter: Option<TopicHandle>,
}

impl QueueConnection {
    pub fn name(&self) -> &str {
        &self.queue.name
    }
}

type ConnectionCell = Arc<OnceCell<Arc<QueueConnection>>>;

pub struct ConnectionManager {
    registry: Arc<QueueRegistry>,
    transport: Arc<dyn Transport>,
    cells: DashMap<String, ConnectionCell>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<QueueRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            cells: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    /// キャッシュ済みの接続を返す。初回は topic / subscription を作成して結線する。
    pub async fn connection(&self, name: &str) -> Result<Arc<QueueConnection>, QueueError> {
        let queue = self.registry.resolve(name)?;

        // DashMap のロックは await をまたがない
        let cell = self
            .cells
            .entry(name.to_string())
            .or_default()
            .value()
            .clone();

        cell.get_or_try_init(|| async { self.bind(queue).await.map(Arc::new) })
            .await
            .cloned()
    }

    /// 結線し直してキャッシュを差し替える
    pub async fn rebind(&self, name: &str) -> Result<Arc<QueueConnection>, QueueError> {
        let queue = self.registry.resolve(name)?;
        let connection = Arc::new(self.bind(queue).await?);
        self.cells.insert(
            name.to_string(),
            Arc::new(OnceCell::new_with(Some(connection.clone()))),
        );
        info!(queue = name, "queue rebound");
        Ok(connection)
    }

    async fn bind(&self, queue: ResolvedQueue) -> Result<QueueConnection, QueueError> {
        let binding_error = |source: TransportError| QueueError::Binding {
            queue: queue.name.clone(),
            source,
        };

        let topics = self.transport.list_topics().await.map_err(binding_error)?;
        self.ensure_topic(&topics, &queue.topic)
            .await
            .map_err(binding_error)?;
        if let Some(dlq) = queue.config.dead_letter_topic() {
            self.ensure_topic(&topics, dlq).await.map_err(binding_error)?;
        }

        let subscriptions = self
            .transport
            .list_subscriptions()
            .await
            .map_err(binding_error)?;
        if subscriptions.iter().any(|s| s == &queue.subscription) {
            debug!(queue = %queue.name, subscription = %queue.subscription, "subscription exists");
        } else {
            info!(queue = %queue.name, subscription = %queue.subscription, "creating subscription");
            let options = queue.config.subscription_options();
            match self
                .transport
                .create_subscription(&queue.topic, &queue.subscription, &options)
                .await
            {
                Ok(()) | Err(TransportError::AlreadyExists(_)) => {}
                Err(e) => return Err(binding_error(e)),
            }
        }

        let transport = self.transport.clone();
        Ok(QueueConnection {
            topic: TopicHandle::new(queue.topic.clone(), transport.clone()),
            subscription: SubscriptionHandle::new(queue.subscription.clone(), transport.clone()),
            dead_letter: queue
                .config
                .dead_letter_topic()
                .map(|t| TopicHandle::new(t, transport.clone())),
            queue,
        })
    }

    async fn ensure_topic(&self, existing: &[String], name: &str) -> Result<(), TransportError> {
        if existing.iter().any(|t| t == name) {
            return Ok(());
        }
        info!(topic = name, "creating topic");
        match self.transport.create_topic(name).await {
            // created concurrently by another binder
            Ok(()) | Err(TransportError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
