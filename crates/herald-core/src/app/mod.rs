//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder / QueueEngine**: 構築とワイヤリング、呼び出し側の API
//! - **ConnectionManager**: キュー名 → topic / subscription の遅延結線
//! - **Publisher**: Envelope の構築と publish
//! - **DeliveryListener**: 配送 1 件の処理（decode→defer→guard→dispatch→settle）
//! - **ActionDispatcher**: payload → Capability 呼び出し
//! - **RetryController**: 成功・失敗の後始末（backoff / dead-letter）
//! - **InFlightGuard / StatsAggregator**: プロセス内の共有状態

pub mod connections;
pub mod dispatcher;
pub mod engine;
pub mod guard;
pub mod listener;
pub mod publisher;
pub mod retry;
pub mod stats;

// 主要な型を再エクスポート
pub use self::connections::{ConnectionManager, QueueConnection};
pub use self::dispatcher::ActionDispatcher;
pub use self::engine::{BuildError, EngineBuilder, QueueEngine};
pub use self::guard::{InFlightGuard, InFlightPermit};
pub use self::listener::DeliveryListener;
pub use self::publisher::Publisher;
pub use self::retry::{Outcome, RetryController};
pub use self::stats::StatsAggregator;
