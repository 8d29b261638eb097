//! IdGenerator port - ID 生成の抽象化
//!
//! テスト容易性のために、trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{EnvelopeId, MessageId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は Envelope の `id` と `metadata.messageId` を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（Publisher は複数タスクから呼ばれる）
pub trait IdGenerator: Send + Sync {
    fn generate_envelope_id(&self) -> EnvelopeId;

    /// 重複排除キーになるので、プロセス内で一意であること
    fn generate_message_id(&self) -> MessageId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// テスト時に FixedClock を使うと timestamp 部分が固定されます。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_envelope_id(&self) -> EnvelopeId {
        EnvelopeId::from(self.next_ulid())
    }

    fn generate_message_id(&self) -> MessageId {
        MessageId::from(self.next_ulid())
    }
}
