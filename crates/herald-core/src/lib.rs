//! herald-core
//!
//! Core building blocks for the Herald message-queue engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, action, state, retry, decision, errors, events, stats）
//! - **ports**: 抽象化レイヤー（Transport, Capability, Clock, IdGenerator, EventSink）
//! - **config**: キュー設定の読み込みと解決（QueuesConfig, ConfigLoader, QueueRegistry）
//! - **app**: アプリケーションロジック（engine, publisher, listener, dispatcher, retry, stats）
//! - **impls**: 実装（InMemoryTransport, ServiceRegistry など開発用）
//! - **observability**: ログ初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{EngineBuilder, QueueEngine};
