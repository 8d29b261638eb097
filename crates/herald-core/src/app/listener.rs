//! DeliveryListener - トランスポートからの配送の入口
//!
//! # フロー（配送 1 件ごと）
//! 1. body を Envelope に decode（失敗したら Nack）
//! 2. scheduled_for が未来なら残り時間で再 publish して Ack
//! 3. InFlightGuard を取れなければ重複配送として Ack
//! 4. ActionDispatcher で実行し、結果を RetryController に渡す
//! 5. controller が結末を引き受けたら Ack（再 publish 失敗なら Nack）

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::dispatcher::ActionDispatcher;
use super::guard::InFlightGuard;
use super::publisher::Publisher;
use super::retry::RetryController;
use crate::config::ResolvedQueue;
use crate::domain::envelope::Envelope;
use crate::domain::state::EnvelopeStatus;
use crate::ports::{AckDecision, Clock, InboundMessage, MessageHandler, TransportError};

/// 1 つのキューの subscription に結びつく listener
///
/// InFlightGuard は全 listener で共有する。
pub struct DeliveryListener {
    queue: ResolvedQueue,
    guard: InFlightGuard,
    dispatcher: Arc<ActionDispatcher>,
    controller: Arc<RetryController>,
    publisher: Arc<Publisher>,
    clock: Arc<dyn Clock>,
}

impl DeliveryListener {
    pub fn new(
        queue: ResolvedQueue,
        guard: InFlightGuard,
        dispatcher: Arc<ActionDispatcher>,
        controller: Arc<RetryController>,
        publisher: Arc<Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            guard,
            dispatcher,
            controller,
            publisher,
            clock,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue.name
    }

    pub async fn handle(&self, message: InboundMessage) -> AckDecision {
        let envelope = match Envelope::from_slice(&message.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    queue = %self.queue.name,
                    transport_message_id = message.message_id.as_deref().unwrap_or_default(),
                    error = %e,
                    "undecodable message"
                );
                return AckDecision::Nack;
            }
        };

        let span = info_span!(
            "delivery",
            queue = %self.queue.name,
            message_id = %envelope.message_id(),
        );
        self.process(envelope).instrument(span).await
    }

    async fn process(&self, mut envelope: Envelope) -> AckDecision {
        if let Some(err) = envelope.dead_letter_error() {
            warn!(code = err.code().as_str(), error = %err, "dead-lettered message redelivered, skipping");
            return AckDecision::Ack;
        }
        if envelope.status.is_terminal() {
            debug!(status = %envelope.status, "already terminal, skipping");
            return AckDecision::Ack;
        }

        if let Some(remaining) = envelope.remaining_delay(self.clock.now()) {
            info!(delay_ms = remaining.as_millis() as u64, "not due yet, rescheduling");
            return match self.publisher.reschedule(&envelope).await {
                Ok(()) => AckDecision::Ack,
                Err(e) => {
                    error!(error = %e, "reschedule failed");
                    AckDecision::Nack
                }
            };
        }

        let Some(_permit) = self.guard.acquire(envelope.message_id()) else {
            info!("duplicate delivery, already in flight");
            return AckDecision::Ack;
        };

        envelope.status = EnvelopeStatus::Processing;
        let started = Instant::now();
        let result = self
            .dispatcher
            .execute(&envelope, self.queue.config.dispatch_timeout())
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(value) => {
                self.controller.on_success(envelope, value, elapsed);
                AckDecision::Ack
            }
            Err(failure) => match self
                .controller
                .on_failure(envelope, failure, &self.queue.config, elapsed)
                .await
            {
                Ok(outcome) => {
                    debug!(?outcome, "failure handed off");
                    AckDecision::Ack
                }
                Err(e) => {
                    warn!(error = %e, "could not hand off failure, requesting redelivery");
                    AckDecision::Nack
                }
            },
        }
    }
}

#[async_trait]
impl MessageHandler for DeliveryListener {
    async fn on_message(&self, message: InboundMessage) -> AckDecision {
        self.handle(message).await
    }

    fn on_error(&self, subscription: &str, error: &TransportError) {
        error!(queue = %self.queue.name, subscription, error = %error, "subscription error");
    }
}
