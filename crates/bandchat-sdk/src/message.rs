//! 消息与参与方模型

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::DedupPolicy;
use crate::store::MessageQuery;

/// 参与方 ID（用户或乐队）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PartyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// 参与方类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartyKind {
    User,
    /// 乐队（群组）以单一身份参与聊天
    Band,
}

/// 聊天参与方
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub id: PartyId,
    pub name: String,
    pub kind: PartyKind,
}

impl Party {
    pub fn user<I: Into<PartyId>, S: Into<String>>(id: I, name: S) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: PartyKind::User,
        }
    }

    pub fn band<I: Into<PartyId>, S: Into<String>>(id: I, name: S) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: PartyKind::Band,
        }
    }
}

/// 存储层分配的文档 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 聊天消息
///
/// 显示名在发送时解析并冗余保存，参与方改名后不会回溯更新。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: PartyId,
    pub receiver_id: PartyId,
    pub sender_name: String,
    pub receiver_name: String,
    pub body: String,
    /// 发送端时钟（UTC 毫秒）
    pub sent_at: i64,
    /// 持久化确认前为 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
}

impl Message {
    /// 构造一条尚未持久化的消息
    pub fn outgoing(sender: &Party, receiver: &Party, body: impl Into<String>, sent_at: i64) -> Self {
        Self {
            sender_id: sender.id.clone(),
            receiver_id: receiver.id.clone(),
            sender_name: sender.name.clone(),
            receiver_name: receiver.name.clone(),
            body: body.into(),
            sent_at,
            document_id: None,
        }
    }

    pub fn with_document_id(mut self, id: DocumentId) -> Self {
        self.document_id = Some(id);
        self
    }

    /// 是否已被存储层确认
    pub fn is_acknowledged(&self) -> bool {
        self.document_id.is_some()
    }

    pub fn dedup_key(&self, policy: DedupPolicy) -> MessageKey {
        match policy {
            DedupPolicy::SentAtOnly => MessageKey::SentAt(self.sent_at),
            DedupPolicy::Identity => match &self.document_id {
                Some(id) => MessageKey::Document(id.clone()),
                None => MessageKey::Pending {
                    sender: self.sender_id.clone(),
                    sent_at: self.sent_at,
                    body: self.body.clone(),
                },
            },
        }
    }
}

/// 合并时使用的去重键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Document(DocumentId),
    /// 未确认消息没有 document_id，内容也计入键，同一毫秒内的不同消息不会折叠
    Pending { sender: PartyId, sent_at: i64, body: String },
    SentAt(i64),
}

/// 订阅流标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamId {
    /// 本端发出的消息（订阅 A）
    Outbound,
    /// 对端发出的消息（订阅 B）
    Inbound,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Outbound => f.write_str("outbound"),
            StreamId::Inbound => f.write_str("inbound"),
        }
    }
}

/// 会话标识：本端 + 对端
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationKey {
    pub local: PartyId,
    pub remote: PartyId,
}

impl ConversationKey {
    pub fn new<L: Into<PartyId>, R: Into<PartyId>>(local: L, remote: R) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }

    /// sender = local AND receiver = remote
    pub fn outbound_query(&self) -> MessageQuery {
        MessageQuery::new(self.local.clone(), self.remote.clone())
    }

    /// sender = remote AND receiver = local
    pub fn inbound_query(&self) -> MessageQuery {
        MessageQuery::new(self.remote.clone(), self.local.clone())
    }

    pub fn query_for(&self, stream: StreamId) -> MessageQuery {
        match stream {
            StreamId::Outbound => self.outbound_query(),
            StreamId::Inbound => self.inbound_query(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.local, self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_by_policy() {
        let alice = Party::user("u1", "Alice");
        let band = Party::band("b1", "The Lints");
        let pending = Message::outgoing(&alice, &band, "hi", 100);

        assert_eq!(
            pending.dedup_key(DedupPolicy::Identity),
            MessageKey::Pending {
                sender: PartyId::from("u1"),
                sent_at: 100,
                body: "hi".to_string(),
            }
        );
        assert_eq!(pending.dedup_key(DedupPolicy::SentAtOnly), MessageKey::SentAt(100));

        let acked = pending.with_document_id(DocumentId::new("doc-1"));
        assert!(acked.is_acknowledged());
        assert_eq!(
            acked.dedup_key(DedupPolicy::Identity),
            MessageKey::Document(DocumentId::new("doc-1"))
        );
    }

    #[test]
    fn test_conversation_queries() {
        let key = ConversationKey::new("u1", "u2");
        let outbound = key.query_for(StreamId::Outbound);
        let inbound = key.query_for(StreamId::Inbound);

        assert_eq!(outbound.sender_id, PartyId::from("u1"));
        assert_eq!(outbound.receiver_id, PartyId::from("u2"));
        assert_eq!(inbound.sender_id, PartyId::from("u2"));
        assert_eq!(inbound.receiver_id, PartyId::from("u1"));
        assert_eq!(key.to_string(), "u1->u2");
    }

    #[test]
    fn test_message_json_shape() {
        let msg = Message::outgoing(&Party::user("u1", "Alice"), &Party::user("u2", "Bob"), "hey", 150);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["senderId"], "u1");
        assert_eq!(value["receiverName"], "Bob");
        assert_eq!(value["sentAt"], 150);
        assert!(value.get("documentId").is_none());
    }
}
