//! InFlightGuard - プロセス内の二重ディスパッチ防止
//!
//! メモリ上の集合だけなので、別プロセス（別インスタンス）が同じメッセージを
//! 同時に処理することは防げません。

use std::sync::Arc;

use dashmap::DashSet;

use crate::domain::ids::MessageId;

/// 処理中の `messageId` の集合
///
/// Clone は同じ集合を共有する。
#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
    ids: Arc<DashSet<MessageId>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 未登録なら登録して `true`。既に処理中なら `false`。
    pub fn try_acquire(&self, id: &MessageId) -> bool {
        self.ids.insert(id.clone())
    }

    /// `try_acquire` + drop 時に自動で release する permit
    pub fn acquire(&self, id: &MessageId) -> Option<InFlightPermit> {
        self.try_acquire(id).then(|| InFlightPermit {
            ids: self.ids.clone(),
            id: id.clone(),
        })
    }

    pub fn release(&self, id: &MessageId) {
        self.ids.remove(id);
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// 成功・失敗・再スケジュール・panic のどの経路でも drop で release される
#[derive(Debug)]
pub struct InFlightPermit {
    ids: Arc<DashSet<MessageId>>,
    id: MessageId,
}

impl InFlightPermit {
    pub fn message_id(&self) -> &MessageId {
        &self.id
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.ids.remove(&self.id);
    }
}
