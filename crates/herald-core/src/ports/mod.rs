//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の協調者（pub/sub トランスポート、下流サービス、監視系）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - トランスポートが配送の正本（コアはメモリ上の in-flight 集合しか持たない）
//! - 下流サービスは名前で引く（CapabilityRegistry）
//! - 通知は構築時に渡された EventSink にだけ送る

pub mod capability;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod transport;

// 主要な trait を再エクスポート
pub use self::capability::{
    Capability, CapabilityError, CapabilityRegistry, CapabilityResult, Method,
};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::transport::{
    AckDecision, DeadLetterPolicy, InboundMessage, MessageHandler, OutboundMessage,
    PushDecodeError, SubscriptionHandle, SubscriptionOptions, TopicHandle, Transport,
    TransportError,
};
