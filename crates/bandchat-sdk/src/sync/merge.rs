//! 两路快照合并
//!
//! 每路只保留最近一次完整快照，视图总是两路最新快照的并集，
//! 因此重复投递同一快照不会改变结果，且结果与投递顺序无关。

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::DedupPolicy;
use crate::message::{Message, MessageKey, PartyId, StreamId};

#[derive(Debug, Clone)]
pub struct SnapshotMerger {
    policy: DedupPolicy,
    outbound: Option<Vec<Message>>,
    inbound: Option<Vec<Message>>,
}

impl SnapshotMerger {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            outbound: None,
            inbound: None,
        }
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// 用最新快照替换该路的保留集合
    pub fn apply(&mut self, stream: StreamId, messages: Vec<Message>) {
        match stream {
            StreamId::Outbound => self.outbound = Some(messages),
            StreamId::Inbound => self.inbound = Some(messages),
        }
    }

    /// 至少收到过一路快照
    pub fn is_live(&self) -> bool {
        self.outbound.is_some() || self.inbound.is_some()
    }

    fn retained(&self) -> impl Iterator<Item = &Message> {
        self.outbound
            .iter()
            .flatten()
            .chain(self.inbound.iter().flatten())
    }

    /// 按 sent_at 升序、无重复的合并结果
    pub fn merged(&self) -> Vec<Message> {
        match self.policy {
            DedupPolicy::SentAtOnly => self.merge_by_sent_at(),
            DedupPolicy::Identity => self.merge_by_identity(),
        }
    }

    fn merge_by_sent_at(&self) -> Vec<Message> {
        // 后合并的覆盖先合并的
        let mut by_sent_at: BTreeMap<i64, Message> = BTreeMap::new();
        for message in self.retained() {
            by_sent_at.insert(message.sent_at, message.clone());
        }
        by_sent_at.into_values().collect()
    }

    fn merge_by_identity(&self) -> Vec<Message> {
        let mut by_key: HashMap<MessageKey, Message> = HashMap::new();
        for message in self.retained() {
            by_key.insert(message.dedup_key(self.policy), message.clone());
        }

        // 已确认的消息替代内容相同的未确认副本
        let acknowledged: HashSet<(PartyId, i64, String)> = by_key
            .values()
            .filter(|m| m.is_acknowledged())
            .map(|m| (m.sender_id.clone(), m.sent_at, m.body.clone()))
            .collect();

        let mut merged: Vec<Message> = by_key
            .into_values()
            .filter(|m| {
                m.is_acknowledged()
                    || !acknowledged.contains(&(m.sender_id.clone(), m.sent_at, m.body.clone()))
            })
            .collect();
        merged.sort_by(compare_messages);
        merged
    }
}

/// sent_at 相同时依次按发送方、文档 ID、内容排序
fn compare_messages(a: &Message, b: &Message) -> Ordering {
    a.sent_at
        .cmp(&b.sent_at)
        .then_with(|| a.sender_id.cmp(&b.sender_id))
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.body.cmp(&b.body))
}
