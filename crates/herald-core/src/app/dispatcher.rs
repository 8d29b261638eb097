//! ActionDispatcher - Envelope の payload を下流サービスの呼び出しに変換
//!
//! # フロー
//! 1. `payload.service` から Capability を引く（なければ ServiceNotFound）
//! 2. payload を Invocation に解決（method 優先、標準操作は閉じた集合）
//! 3. `message_timeout` 付きで実行
//!
//! Capability のエラーは加工せずに返します（解釈は RetryController の責務）。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::domain::action::Invocation;
use crate::domain::envelope::Envelope;
use crate::domain::errors::QueueError;
use crate::ports::{Capability, CapabilityRegistry};

pub struct ActionDispatcher {
    services: Arc<dyn CapabilityRegistry>,
}

impl ActionDispatcher {
    pub fn new(services: Arc<dyn CapabilityRegistry>) -> Self {
        Self { services }
    }

    /// `timeout` が `None` なら無制限に待つ
    pub async fn execute(
        &self,
        envelope: &Envelope,
        timeout: Option<Duration>,
    ) -> Result<Value, QueueError> {
        let service = envelope.payload.service.as_deref().unwrap_or_default();
        let capability = self
            .services
            .lookup(service)
            .ok_or_else(|| QueueError::ServiceNotFound(service.to_string()))?;

        let invocation = Invocation::from_payload(&envelope.payload)?;
        debug!(service, invocation = invocation.name(), "dispatching");

        let call = invoke(capability.as_ref(), service, invocation);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| QueueError::Timeout(limit))?,
            None => call.await,
        }
    }
}

async fn invoke(
    capability: &dyn Capability,
    service: &str,
    invocation: Invocation,
) -> Result<Value, QueueError> {
    let value = match invocation {
        Invocation::Create { data, params } => capability.create(data, params).await?,
        Invocation::Get { id, params } => capability.get(id, params).await?,
        Invocation::Find { params } => capability.find(params).await?,
        Invocation::Patch { id, data, params } => capability.patch(id, data, params).await?,
        Invocation::Remove { id, params } => capability.remove(id, params).await?,
        Invocation::Update { id, data, params } => capability.update(id, data, params).await?,
        Invocation::Method { name, args } => {
            let method = capability
                .method(&name)
                .ok_or_else(|| QueueError::MethodNotFound {
                    service: service.to_string(),
                    method: name.clone(),
                })?;
            method.call(args).await?
        }
    };
    Ok(value)
}
