//! 进程内文档存储
//!
//! 语义与远端文档数据库保持一致：订阅后立即推送一次快照，之后每次写入都向匹配的
//! 监听器推送完整结果集。附带故障注入接口，供测试和离线演示使用。

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DocumentStore, MessageQuery, PartyDirectory, SnapshotSink};
use crate::error::{BandchatError, Result};
use crate::message::{DocumentId, Message, Party, PartyId};
use crate::subscription::Subscription;

struct Listener {
    query: MessageQuery,
    sink: SnapshotSink,
}

#[derive(Default)]
struct StoreInner {
    /// 已持久化的消息（均带 document_id），按写入顺序
    documents: RwLock<Vec<Message>>,
    listeners: RwLock<HashMap<u64, Listener>>,
    next_listener_id: AtomicU64,
    /// 串行化“写入 + 构建快照 + 投递”，保证监听器最后收到的快照就是最新结果集。
    /// 投递期间持有，sink 内不能再调用本存储。
    delivery: Mutex<()>,
    /// 下一次写入失败的原因
    fail_next_add: Mutex<Option<String>>,
    /// 写入延迟，模拟网络往返
    add_delay: Mutex<Option<Duration>>,
}

impl StoreInner {
    fn snapshot(&self, query: &MessageQuery) -> Vec<Message> {
        self.documents
            .read()
            .iter()
            .filter(|m| query.matches(m))
            .cloned()
            .collect()
    }

    fn remove_listener(&self, id: u64) {
        if self.listeners.write().remove(&id).is_some() {
            debug!("监听器已移除: listener_id={}", id);
        }
    }

    fn persist(&self, message: &Message) -> DocumentId {
        let id = DocumentId::new(Uuid::new_v4().to_string());
        let stored = message.clone().with_document_id(id.clone());

        let _delivery = self.delivery.lock();
        self.documents.write().push(stored);
        self.notify(message);
        id
    }

    /// 向受影响的监听器推送最新快照
    ///
    /// 调用方须持有 `delivery`；回调在 documents/listeners 锁外执行。
    fn notify(&self, changed: &Message) {
        let deliveries: Vec<(SnapshotSink, Vec<Message>)> = {
            let listeners = self.listeners.read();
            listeners
                .values()
                .filter(|l| l.query.matches(changed))
                .map(|l| (l.sink.clone(), self.snapshot(&l.query)))
                .collect()
        };

        for (sink, snapshot) in deliveries {
            sink(Ok(snapshot));
        }
    }
}

/// 进程内文档存储
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<StoreInner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入一条消息并通知监听器，不受延迟和故障注入影响
    ///
    /// 用于模拟对端通过其他客户端写入的消息。
    pub fn insert_raw(&self, message: Message) -> DocumentId {
        self.inner.persist(&message)
    }

    /// 让下一次 `add_message` 失败
    pub fn fail_next_add<S: Into<String>>(&self, reason: S) {
        *self.inner.fail_next_add.lock() = Some(reason.into());
    }

    pub fn set_add_delay(&self, delay: Option<Duration>) {
        *self.inner.add_delay.lock() = delay;
    }

    /// 向所有活跃监听器投递一次错误
    pub fn fail_deliveries<S: Into<String>>(&self, reason: S) {
        let reason = reason.into();
        let _delivery = self.inner.delivery.lock();
        let sinks: Vec<SnapshotSink> = self
            .inner
            .listeners
            .read()
            .values()
            .map(|l| l.sink.clone())
            .collect();

        warn!("注入订阅投递失败: listeners={}, reason={}", sinks.len(), reason);
        for sink in sinks {
            sink(Err(BandchatError::Subscription(reason.clone())));
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    pub fn document_count(&self) -> usize {
        self.inner.documents.read().len()
    }

    pub fn documents(&self) -> Vec<Message> {
        self.inner.documents.read().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn subscribe(&self, query: MessageQuery, sink: SnapshotSink) -> Result<Subscription> {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let label = format!("{}->{}#{}", query.sender_id, query.receiver_id, id);

        let delivery = self.inner.delivery.lock();
        self.inner.listeners.write().insert(
            id,
            Listener {
                query: query.clone(),
                sink: sink.clone(),
            },
        );
        debug!("监听器已注册: {}", label);

        // 初始快照
        sink(Ok(self.inner.snapshot(&query)));
        drop(delivery);

        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(label, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_listener(id);
            }
        }))
    }

    async fn add_message(&self, message: &Message) -> Result<DocumentId> {
        let delay = *self.inner.add_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.inner.fail_next_add.lock().take() {
            warn!("写入失败: sender={}, reason={}", message.sender_id, reason);
            return Err(BandchatError::Store(reason));
        }

        let id = self.inner.persist(message);
        debug!("消息已写入: document_id={}, sent_at={}", id, message.sent_at);
        Ok(id)
    }
}

/// 进程内参与方目录
#[derive(Default)]
pub struct MemoryPartyDirectory {
    parties: RwLock<HashMap<PartyId, Party>>,
}

impl MemoryPartyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parties<I: IntoIterator<Item = Party>>(parties: I) -> Self {
        let directory = Self::new();
        for party in parties {
            directory.insert(party);
        }
        directory
    }

    pub fn insert(&self, party: Party) {
        self.parties.write().insert(party.id.clone(), party);
    }

    /// 改名只影响之后发送的消息
    pub fn rename<S: Into<String>>(&self, id: &PartyId, name: S) -> Result<()> {
        let mut parties = self.parties.write();
        let party = parties
            .get_mut(id)
            .ok_or_else(|| BandchatError::NotFound(format!("party {}", id)))?;
        party.name = name.into();
        info!("参与方已改名: id={}, name={}", id, party.name);
        Ok(())
    }

    pub fn get(&self, id: &PartyId) -> Option<Party> {
        self.parties.read().get(id).cloned()
    }
}

#[async_trait]
impl PartyDirectory for MemoryPartyDirectory {
    async fn resolve(&self, id: &PartyId) -> Result<Party> {
        self.get(id)
            .ok_or_else(|| BandchatError::NotFound(format!("party {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_sink() -> (SnapshotSink, Arc<Mutex<Vec<Result<Vec<Message>>>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let sink: SnapshotSink = Arc::new(move |snapshot| received_clone.lock().push(snapshot));
        (sink, received)
    }

    fn msg(sender: &str, receiver: &str, body: &str, sent_at: i64) -> Message {
        Message::outgoing(&Party::user(sender, sender), &Party::user(receiver, receiver), body, sent_at)
    }

    #[tokio::test]
    async fn test_subscribe_pushes_full_snapshots() {
        let store = MemoryDocumentStore::new();
        store.insert_raw(msg("u1", "u2", "before", 10));

        let (sink, received) = collecting_sink();
        let query = MessageQuery::new("u1".into(), "u2".into());
        let _sub = store.subscribe(query, sink).unwrap();

        store.add_message(&msg("u1", "u2", "after", 20)).await.unwrap();
        // 不匹配的写入不触发推送
        store.add_message(&msg("u2", "u1", "other", 30)).await.unwrap();

        let received = received.lock();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].as_ref().unwrap().len(), 1);
        let latest = received[1].as_ref().unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|m| m.is_acknowledged()));
    }

    #[test]
    fn test_concurrent_writes_deliver_latest_snapshot_last() {
        const WRITERS: usize = 6;

        for round in 0..200 {
            let store = MemoryDocumentStore::new();
            let last_len = Arc::new(Mutex::new(0usize));
            let last_len_clone = last_len.clone();
            let sink: SnapshotSink = Arc::new(move |snapshot: Result<Vec<Message>>| {
                if let Ok(messages) = snapshot {
                    *last_len_clone.lock() = messages.len();
                }
            });
            let _sub = store
                .subscribe(MessageQuery::new("u1".into(), "u2".into()), sink)
                .unwrap();

            let barrier = std::sync::Barrier::new(WRITERS);
            std::thread::scope(|scope| {
                for writer in 0..WRITERS {
                    let store = store.clone();
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        store.insert_raw(msg("u1", "u2", &format!("w{}", writer), writer as i64));
                    });
                }
            });

            assert_eq!(*last_len.lock(), store.document_count(), "round {}", round);
            assert_eq!(store.document_count(), WRITERS);
        }
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_delivery() {
        let store = MemoryDocumentStore::new();
        let (sink, received) = collecting_sink();
        let sub = store
            .subscribe(MessageQuery::new("u1".into(), "u2".into()), sink)
            .unwrap();
        assert_eq!(store.listener_count(), 1);

        drop(sub);
        assert_eq!(store.listener_count(), 0);

        store.add_message(&msg("u1", "u2", "late", 10)).await.unwrap();
        assert_eq!(received.lock().len(), 1); // 只有初始快照
    }

    #[tokio::test]
    async fn test_fail_next_add_only_once() {
        let store = MemoryDocumentStore::new();
        store.fail_next_add("permission denied");

        let err = store.add_message(&msg("u1", "u2", "hi", 1)).await.unwrap_err();
        assert_eq!(err, BandchatError::Store("permission denied".to_string()));
        assert_eq!(store.document_count(), 0);

        assert!(store.add_message(&msg("u1", "u2", "hi", 1)).await.is_ok());
        assert_eq!(store.document_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_deliveries_reaches_listeners() {
        let store = MemoryDocumentStore::new();
        let (sink, received) = collecting_sink();
        let _sub = store
            .subscribe(MessageQuery::new("u1".into(), "u2".into()), sink)
            .unwrap();

        store.fail_deliveries("backend unavailable");

        let received = received.lock();
        assert!(matches!(received[1], Err(BandchatError::Subscription(_))));
    }

    #[tokio::test]
    async fn test_party_directory() {
        let directory = MemoryPartyDirectory::with_parties([
            Party::user("u1", "Alice"),
            Party::band("b1", "The Lints"),
        ]);

        assert_eq!(directory.display_name(&"b1".into()).await.unwrap(), "The Lints");
        directory.rename(&"u1".into(), "Alicia").unwrap();
        assert_eq!(directory.display_name(&"u1".into()).await.unwrap(), "Alicia");

        assert!(matches!(
            directory.display_name(&"nobody".into()).await,
            Err(BandchatError::NotFound(_))
        ));
        assert!(directory.rename(&"nobody".into(), "x").is_err());
    }
}
