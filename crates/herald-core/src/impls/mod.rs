//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryTransport**: 開発用の pub/sub トランスポート
//! - **ServiceRegistry**: CapabilityRegistry のデフォルト実装
//! - **NoopEventSink / LoggingEventSink / ChannelEventSink**: EventSink
//!
//! 本番用のトランスポート実装は別クレートに配置する想定です。

pub mod event_sink;
pub mod inmem_transport;
pub mod service_registry;

// 主要な型を再エクスポート
pub use self::event_sink::{ChannelEventSink, LoggingEventSink, NoopEventSink};
pub use self::inmem_transport::{InMemoryTransport, PublishedMessage};
pub use self::service_registry::{RegistryError, ServiceRegistry};
