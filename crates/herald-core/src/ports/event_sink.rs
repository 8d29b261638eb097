//! EventSink port - アプリケーション境界への通知
//!
//! `queue:completed` / `queue:error` を外部の監視系へ渡します。
//! エンジンは構築時に受け取った EventSink にだけ emit します（グローバルな emitter は持たない）。

use crate::domain::events::QueueEvent;

pub trait EventSink: Send + Sync {
    /// 通知は fire-and-forget。受け手の失敗はエンジンの処理に影響しない。
    fn emit(&self, event: QueueEvent);
}
