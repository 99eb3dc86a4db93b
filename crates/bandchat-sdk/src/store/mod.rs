//! 外部协作方接口
//!
//! - 文档存储：按 (sender, receiver) 等值查询的实时订阅 + 写入
//! - 参与方目录：把参与方 ID 解析成显示名

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::message::{DocumentId, Message, Party, PartyId};
use crate::subscription::Subscription;

pub mod memory;

pub use memory::{MemoryDocumentStore, MemoryPartyDirectory};

/// 快照回调：每次变更推送完整的匹配集合（不是增量），或一次投递错误
pub type SnapshotSink = Arc<dyn Fn(Result<Vec<Message>>) + Send + Sync>;

/// 等值查询：sender = sender_id AND receiver = receiver_id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageQuery {
    pub sender_id: PartyId,
    pub receiver_id: PartyId,
}

impl MessageQuery {
    pub fn new(sender_id: PartyId, receiver_id: PartyId) -> Self {
        Self {
            sender_id,
            receiver_id,
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        message.sender_id == self.sender_id && message.receiver_id == self.receiver_id
    }
}

/// 文档存储
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 建立实时订阅
    ///
    /// 订阅建立后应尽快推送一次当前快照；返回的句柄被释放后不得再回调 `sink`。
    fn subscribe(&self, query: MessageQuery, sink: SnapshotSink) -> Result<Subscription>;

    /// 写入一条消息，返回存储层分配的文档 ID
    async fn add_message(&self, message: &Message) -> Result<DocumentId>;
}

/// 参与方目录
#[async_trait]
pub trait PartyDirectory: Send + Sync {
    async fn resolve(&self, id: &PartyId) -> Result<Party>;

    async fn display_name(&self, id: &PartyId) -> Result<String> {
        Ok(self.resolve(id).await?.name)
    }
}
