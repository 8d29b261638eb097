//! Capability port - Envelope が呼び出す下流サービス
//!
//! Capability は標準操作 `{create, get, find, patch, remove, update}` と、
//! 任意の名前付きメソッドを公開します。名前付きメソッドは `method(name)` で
//! 名前から引ける（lookup-by-name）ものだけが呼び出し可能です。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::envelope::ResourceId;

/// Capability が返す失敗
///
/// `code` / `details` は Envelope の `error` にそのまま記録されます。
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub code: Option<String>,
    pub message: String,
    pub details: Option<Value>,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn not_implemented(operation: &str) -> Self {
        Self::new(format!("{operation} is not implemented")).with_code("NOT_IMPLEMENTED")
    }
}

pub type CapabilityResult = Result<Value, CapabilityError>;

/// 下流サービス
///
/// 実装しない標準操作は `NOT_IMPLEMENTED` で失敗します。
#[async_trait]
pub trait Capability: Send + Sync {
    async fn create(&self, _data: Value, _params: Option<Value>) -> CapabilityResult {
        Err(CapabilityError::not_implemented("create"))
    }

    async fn get(&self, _id: ResourceId, _params: Option<Value>) -> CapabilityResult {
        Err(CapabilityError::not_implemented("get"))
    }

    async fn find(&self, _params: Value) -> CapabilityResult {
        Err(CapabilityError::not_implemented("find"))
    }

    async fn patch(&self, _id: ResourceId, _data: Value, _params: Option<Value>) -> CapabilityResult {
        Err(CapabilityError::not_implemented("patch"))
    }

    async fn remove(&self, _id: ResourceId, _params: Option<Value>) -> CapabilityResult {
        Err(CapabilityError::not_implemented("remove"))
    }

    async fn update(
        &self,
        _id: ResourceId,
        _data: Value,
        _params: Option<Value>,
    ) -> CapabilityResult {
        Err(CapabilityError::not_implemented("update"))
    }

    /// 名前付きメソッドの lookup。呼び出せないなら `None`。
    fn method(&self, _name: &str) -> Option<Arc<dyn Method>> {
        None
    }
}

/// 名前付きメソッド（位置引数で呼ぶ）
#[async_trait]
pub trait Method: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> CapabilityResult;
}

/// サービス名から Capability を引く
pub trait CapabilityRegistry: Send + Sync {
    fn lookup(&self, service: &str) -> Option<Arc<dyn Capability>>;
}
