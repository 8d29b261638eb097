//! Publisher - Envelope を組み立ててトランスポートへ publish
//!
//! # フロー
//! 1. payload の検証（service + action、または method）
//! 2. キュー名を解決し、QueueConnection を取得（初回は結線）
//! 3. Envelope 生成（呼び出し側の metadata が既定値より優先）
//! 4. 属性・ordering key・schedule time を付けて publish
//!
//! 再試行（RetryController）の再 publish と dead-letter への publish も同じ経路を通ります。

use std::sync::Arc;

use tracing::{info, warn};

use super::connections::{ConnectionManager, QueueConnection};
use crate::domain::envelope::{CreateRequest, Envelope, EnvelopeDefaults};
use crate::domain::errors::QueueError;
use crate::ports::{Clock, IdGenerator, OutboundMessage, TopicHandle, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Destination {
    Queue,
    DeadLetter,
}

pub struct Publisher {
    connections: Arc<ConnectionManager>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Publisher {
    pub fn new(
        connections: Arc<ConnectionManager>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            connections,
            clock,
            ids,
        }
    }

    /// 新しい Envelope を作って publish する
    ///
    /// 検証・設定のエラーは呼び出し側へそのまま返す（再試行しない）。
    pub async fn create(&self, request: CreateRequest) -> Result<Envelope, QueueError> {
        if !request.payload.has_target() {
            return Err(QueueError::Validation(
                "payload.service and payload.action are required unless payload.method is set"
                    .to_string(),
            ));
        }

        let connection = self
            .connections
            .connection(request.queue_name())
            .await?;

        let mut envelope = Envelope::from_request(
            request,
            EnvelopeDefaults {
                id: self.ids.generate_envelope_id(),
                message_id: self.ids.generate_message_id(),
                now: self.clock.now(),
                max_retries: connection.queue.config.max_retries,
            },
        );

        let transport_id = self.send(&envelope, Destination::Queue).await?;
        if transport_id != envelope.message_id().as_str() {
            envelope.metadata.transport_message_id = Some(transport_id);
        }

        info!(
            queue = %envelope.queue_name(),
            message_id = %envelope.message_id(),
            priority = envelope.metadata.priority,
            scheduled = envelope.metadata.scheduled_for.is_some(),
            "message published"
        );
        Ok(envelope)
    }

    /// 自分のキューへ publish し直す（`scheduled_for` はそのまま schedule hint になる）
    pub async fn reschedule(&self, envelope: &Envelope) -> Result<(), QueueError> {
        self.send(envelope, Destination::Queue).await.map(drop)
    }

    /// dead-letter topic へ同じシリアライズ形式で publish する
    pub async fn publish_dead_letter(&self, envelope: &Envelope) -> Result<(), QueueError> {
        self.send(envelope, Destination::DeadLetter).await.map(drop)
    }

    fn outbound(&self, envelope: &Envelope) -> Result<OutboundMessage, QueueError> {
        let now = self.clock.now();
        Ok(OutboundMessage {
            data: envelope.to_bytes()?,
            attributes: envelope.attributes(),
            ordering_key: Some(envelope.ordering_key()),
            schedule_time: envelope.metadata.scheduled_for.filter(|at| *at > now),
        })
    }

    /// topic が見つからなければ一度だけ結線し直して再送する
    async fn send(&self, envelope: &Envelope, destination: Destination) -> Result<String, QueueError> {
        let queue = envelope.queue_name();
        let message = self.outbound(envelope)?;
        let connection = self.connections.connection(queue).await?;

        let first = topic_for(&connection, destination)?
            .publish(message.clone())
            .await;

        let result = match first {
            Err(TransportError::NotFound(what)) => {
                warn!(queue, %what, message_id = %envelope.message_id(), "topic missing, rebinding queue");
                let connection = self.connections.rebind(queue).await?;
                topic_for(&connection, destination)?.publish(message).await
            }
            other => other,
        };

        result.map_err(|source| QueueError::Publish {
            queue: queue.to_string(),
            message_id: envelope.message_id().clone(),
            source,
        })
    }
}

fn topic_for(connection: &QueueConnection, destination: Destination) -> Result<&TopicHandle, QueueError> {
    match destination {
        Destination::Queue => Ok(&connection.topic),
        Destination::DeadLetter => {
            connection
                .dead_letter
                .as_ref()
                .ok_or_else(|| QueueError::InvalidQueueConfig {
                    queue: connection.name().to_string(),
                    reason: "no dead-letter topic configured".to_string(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, QueueRegistry, QueuesConfig};
    use crate::domain::envelope::{Payload, DEFAULT_PRIORITY};
    use crate::domain::ids::MessageId;
    use crate::domain::state::EnvelopeStatus;
    use crate::impls::InMemoryTransport;
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap()
    }

    fn publisher(transport: &InMemoryTransport) -> Publisher {
        let config = QueuesConfig::default()
            .with_queue("default", QueueConfig::bound("default-topic", "default-sub"))
            .with_queue(
                "delayed-tasks",
                QueueConfig {
                    max_retries: 5,
                    ..QueueConfig::bound("delayed-topic", "delayed-sub").with_dead_letter("delayed-dlq")
                },
            );
        let registry = Arc::new(QueueRegistry::new(config).unwrap());
        let clock = Arc::new(FixedClock::new(t0()));
        Publisher::new(
            Arc::new(ConnectionManager::new(registry, Arc::new(transport.clone()))),
            clock.clone(),
            Arc::new(UlidGenerator::new(clock)),
        )
    }

    #[tokio::test]
    async fn create_assigns_identity_and_defaults() {
        let transport = InMemoryTransport::new();
        let env = publisher(&transport)
            .create(CreateRequest::new(Payload::action(
                "users",
                "create",
                json!({"name": "a"}),
            )))
            .await
            .unwrap();

        assert!(!env.id.to_string().is_empty());
        assert!(!env.message_id().is_empty());
        assert_eq!(env.status, EnvelopeStatus::Pending);
        assert_eq!(env.metadata.priority, DEFAULT_PRIORITY);
        assert_eq!(env.metadata.timestamp, t0());
        assert_eq!(env.metadata.retry_count, 0);
        assert_eq!(env.metadata.max_retries, Some(3));
        assert_eq!(env.metadata.transport_message_id.as_deref(), Some("1"));

        let published = transport.published_to("default-topic");
        assert_eq!(published.len(), 1);
        let msg = &published[0].message;
        assert_eq!(msg.ordering_key.as_deref(), Some("5"));
        assert_eq!(msg.schedule_time, None);
        assert_eq!(msg.attributes["messageId"], env.message_id().as_str());
        assert_eq!(msg.attributes["queueName"], "default");

        let body = Envelope::from_slice(&msg.data).unwrap();
        assert_eq!(body.message_id(), env.message_id());
    }

    #[tokio::test]
    async fn scheduled_request_example() {
        let transport = InMemoryTransport::new();
        let at = t0() + Duration::milliseconds(300_000);
        let env = publisher(&transport)
            .create(
                CreateRequest::new(
                    Payload::action("users", "sendWelcomeEmail", json!({"userId": "123"}))
                        .with_queue("delayed-tasks"),
                )
                .with_priority(1)
                .scheduled_for(at),
            )
            .await
            .unwrap();

        assert_eq!(env.status, EnvelopeStatus::Pending);
        assert_eq!(env.metadata.priority, 1);
        assert_eq!(env.metadata.scheduled_for, Some(at));
        assert_eq!(env.metadata.max_retries, Some(5));

        let msg = &transport.published_to("delayed-topic")[0].message;
        assert_eq!(msg.schedule_time, Some(at));
        assert_eq!(msg.ordering_key.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn metadata_queue_name_routes_the_publish() {
        let transport = InMemoryTransport::new();
        let mut request = CreateRequest::new(Payload::action("users", "create", json!({})));
        request.metadata.queue_name = Some("delayed-tasks".to_string());

        let env = publisher(&transport).create(request).await.unwrap();

        assert_eq!(env.queue_name(), "delayed-tasks");
        assert_eq!(env.metadata.queue_name, "delayed-tasks");
        assert_eq!(env.metadata.max_retries, Some(5));
        assert!(transport.published_to("default-topic").is_empty());

        let published = transport.published_to("delayed-topic");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message.attributes["queueName"], "delayed-tasks");
        let body = Envelope::from_slice(&published[0].message.data).unwrap();
        assert_eq!(body.queue_name(), "delayed-tasks");
    }

    #[tokio::test]
    async fn past_schedule_gets_no_hint() {
        let transport = InMemoryTransport::new();
        let at = t0() - Duration::seconds(1);
        publisher(&transport)
            .create(
                CreateRequest::new(Payload::action("users", "create", json!({}))).scheduled_for(at),
            )
            .await
            .unwrap();

        assert_eq!(transport.published()[0].message.schedule_time, None);
    }

    #[tokio::test]
    async fn caller_message_id_is_preserved() {
        let transport = InMemoryTransport::new();
        let env = publisher(&transport)
            .create(
                CreateRequest::new(Payload::method("mailer", "send", vec![json!("hi")]))
                    .with_message_id(MessageId::new("caller-1")),
            )
            .await
            .unwrap();
        assert_eq!(env.message_id().as_str(), "caller-1");
        assert_eq!(env.metadata.transport_message_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn missing_target_is_a_validation_error() {
        let transport = InMemoryTransport::new();
        let request = CreateRequest::new(Payload {
            service: Some("users".to_string()),
            ..Payload::default()
        });
        let err = publisher(&transport).create(request).await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn unknown_queue_is_not_configured() {
        let transport = InMemoryTransport::new();
        let err = publisher(&transport)
            .create(CreateRequest::new(
                Payload::action("users", "create", json!({})).with_queue("nope"),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::QueueNotConfigured(q) if q == "nope"));
    }

    #[tokio::test]
    async fn transport_failure_becomes_publish_error() {
        let transport = InMemoryTransport::new();
        let publisher = publisher(&transport);
        // bind first so the injected failure hits the publish itself
        publisher.connections.connection("default").await.unwrap();
        transport.fail_next_publishes(1);

        let err = publisher
            .create(
                CreateRequest::new(Payload::action("users", "create", json!({})))
                    .with_message_id(MessageId::new("m-1")),
            )
            .await
            .unwrap_err();
        match err {
            QueueError::Publish {
                queue, message_id, ..
            } => {
                assert_eq!(queue, "default");
                assert_eq!(message_id.as_str(), "m-1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_topic_triggers_one_rebind() {
        let transport = InMemoryTransport::new();
        let publisher = publisher(&transport);
        publisher.connections.connection("default").await.unwrap();
        transport.delete_topic("default-topic");

        publisher
            .create(CreateRequest::new(Payload::action("users", "create", json!({}))))
            .await
            .unwrap();
        assert_eq!(transport.published_to("default-topic").len(), 1);
    }

    #[tokio::test]
    async fn dead_letter_requires_configured_topic() {
        let transport = InMemoryTransport::new();
        let publisher = publisher(&transport);
        let env = publisher
            .create(CreateRequest::new(Payload::action("users", "create", json!({}))))
            .await
            .unwrap();

        assert!(matches!(
            publisher.publish_dead_letter(&env).await,
            Err(QueueError::InvalidQueueConfig { .. })
        ));
    }
}
