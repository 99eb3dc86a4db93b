//! 会话同步引擎
//!
//! 职责：
//! - 持有一个会话的两路实时订阅（本端发出 / 对端发出）
//! - 在单写者任务中串行应用快照，发布有序、无重复的视图
//! - 提交发出的消息（不做乐观插入，消息随订阅快照回到视图）
//! - 关闭时释放订阅并停止合并任务

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ChatSyncConfig;
use crate::error::{BandchatError, Result};
use crate::events::{ChatEvent, EventManager};
use crate::message::{ConversationKey, DocumentId, Message, Party, StreamId};
use crate::store::{DocumentStore, SnapshotSink};
use crate::subscription::Subscription;
use crate::sync::merge::SnapshotMerger;
use crate::sync::SyncState;
use crate::utils::{now_millis, Clock};
use crate::view::{ConversationView, ViewWatcher};

/// 引擎统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub snapshots_applied: u64,
    pub snapshots_failed: u64,
    pub publishes: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
}

/// 投递给合并任务的一次快照
#[derive(Debug)]
struct SnapshotUpdate {
    stream: StreamId,
    snapshot: Result<Vec<Message>>,
}

/// 合并任务上下文
struct MergeWorker {
    key: ConversationKey,
    merger: SnapshotMerger,
    view_tx: watch::Sender<ConversationView>,
    events: Arc<EventManager>,
    stats: Arc<RwLock<EngineStats>>,
    shutdown: CancellationToken,
}

impl MergeWorker {
    async fn run(mut self, mut updates: mpsc::UnboundedReceiver<SnapshotUpdate>) {
        debug!(conversation = %self.key, "合并任务启动");
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                update = updates.recv() => match update {
                    Some(update) => self.apply(update),
                    None => break,
                },
            }
        }

        debug!(conversation = %self.key, "合并任务退出");
    }

    fn apply(&mut self, update: SnapshotUpdate) {
        // 关闭后到达的快照一律丢弃
        if self.shutdown.is_cancelled() {
            return;
        }

        let messages = match update.snapshot {
            Ok(messages) => messages,
            Err(e) => {
                warn!(
                    conversation = %self.key,
                    stream = %update.stream,
                    "订阅投递失败，忽略本次快照: {}", e
                );
                self.stats.write().snapshots_failed += 1;
                self.events.emit(ChatEvent::SnapshotFailed {
                    conversation: self.key.clone(),
                    stream: update.stream,
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
                return;
            }
        };

        debug!(
            conversation = %self.key,
            stream = %update.stream,
            count = messages.len(),
            "应用快照"
        );
        self.merger.apply(update.stream, messages);
        self.stats.write().snapshots_applied += 1;

        let merged = self.merger.merged();
        let mut published = None;
        self.view_tx.send_if_modified(|view| {
            // 首次快照总是发布（状态进入 Live），之后内容不变则不发布
            if view.is_initialized() && view.messages == merged {
                return false;
            }
            view.revision += 1;
            view.messages = merged;
            published = Some((view.revision, view.messages.len()));
            true
        });

        if let Some((revision, message_count)) = published {
            self.stats.write().publishes += 1;
            debug!(conversation = %self.key, revision, count = message_count, "视图已发布");
            self.events.emit(ChatEvent::ViewUpdated {
                conversation: self.key.clone(),
                revision,
                message_count,
                timestamp: now_millis(),
            });
        }
    }
}

/// 会话同步引擎
pub struct ChatSyncEngine {
    key: ConversationKey,
    store: Arc<dyn DocumentStore>,
    events: Arc<EventManager>,
    config: ChatSyncConfig,
    clock: Arc<dyn Clock>,
    updates: mpsc::UnboundedSender<SnapshotUpdate>,
    view_rx: watch::Receiver<ConversationView>,
    subscriptions: Mutex<Vec<Subscription>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    stats: Arc<RwLock<EngineStats>>,
    closed: AtomicBool,
}

impl ChatSyncEngine {
    /// 打开会话：启动合并任务并建立两路订阅
    ///
    /// 必须在 tokio 运行时内调用。任一订阅建立失败时，已建立的订阅会被释放。
    pub async fn open(
        key: ConversationKey,
        store: Arc<dyn DocumentStore>,
        events: Arc<EventManager>,
        config: ChatSyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ConversationView::default());
        let shutdown = CancellationToken::new();
        let stats = Arc::new(RwLock::new(EngineStats::default()));

        let worker = MergeWorker {
            key: key.clone(),
            merger: SnapshotMerger::new(config.dedup_policy),
            view_tx,
            events: events.clone(),
            stats: stats.clone(),
            shutdown: shutdown.clone(),
        };
        let worker = tokio::spawn(worker.run(updates_rx));

        let mut subscriptions = Vec::with_capacity(2);
        for stream in [StreamId::Outbound, StreamId::Inbound] {
            let sink = Self::snapshot_sink(stream, updates_tx.clone(), shutdown.clone());
            match store.subscribe(key.query_for(stream), sink) {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    error!(conversation = %key, stream = %stream, "建立订阅失败: {}", e);
                    shutdown.cancel();
                    drop(subscriptions);
                    return Err(e);
                }
            }
        }

        info!(conversation = %key, policy = ?config.dedup_policy, "✅ 会话已打开");
        events.emit(ChatEvent::ConversationOpened {
            conversation: key.clone(),
            timestamp: now_millis(),
        });

        Ok(Self {
            key,
            store,
            events,
            config,
            clock,
            updates: updates_tx,
            view_rx,
            subscriptions: Mutex::new(subscriptions),
            worker: Mutex::new(Some(worker)),
            shutdown,
            stats,
            closed: AtomicBool::new(false),
        })
    }

    fn snapshot_sink(
        stream: StreamId,
        updates: mpsc::UnboundedSender<SnapshotUpdate>,
        shutdown: CancellationToken,
    ) -> SnapshotSink {
        Arc::new(move |snapshot| {
            if shutdown.is_cancelled() {
                return;
            }
            if updates.send(SnapshotUpdate { stream, snapshot }).is_err() {
                debug!(stream = %stream, "合并任务已退出，丢弃快照");
            }
        })
    }

    /// 投递一路快照（可由任意线程并发调用），由合并任务串行应用
    pub fn on_snapshot(&self, stream: StreamId, snapshot: Result<Vec<Message>>) {
        if self.is_closed() {
            debug!(conversation = %self.key, stream = %stream, "会话已关闭，丢弃快照");
            return;
        }
        if self.updates.send(SnapshotUpdate { stream, snapshot }).is_err() {
            debug!(conversation = %self.key, stream = %stream, "合并任务已退出，丢弃快照");
        }
    }

    /// 发送消息
    ///
    /// 消息体不做校验（由调用方负责）。成功后本地视图不会立即变化，
    /// 新消息在出站订阅下一次推送时出现。失败不重试、不缓存。
    pub async fn send_message(&self, body: &str, sender: &Party, receiver: &Party) -> Result<DocumentId> {
        if self.is_closed() {
            return Err(BandchatError::Closed(self.key.to_string()));
        }
        if sender.id != self.key.local || receiver.id != self.key.remote {
            return Err(BandchatError::InvalidArgument(format!(
                "{}->{} does not belong to conversation {}",
                sender.id, receiver.id, self.key
            )));
        }

        let message = Message::outgoing(sender, receiver, body, self.clock.now_millis());
        let sent_at = message.sent_at;

        let submit = self.store.add_message(&message);
        let result = match self.config.send_timeout_ms {
            Some(timeout_ms) => match tokio::time::timeout(Duration::from_millis(timeout_ms), submit).await {
                Ok(result) => result,
                Err(_) => Err(BandchatError::Timeout(format!(
                    "message submission exceeded {}ms",
                    timeout_ms
                ))),
            },
            None => submit.await,
        };

        match result {
            Ok(document_id) => {
                self.stats.write().messages_sent += 1;
                info!(conversation = %self.key, document_id = %document_id, sent_at, "消息已提交");
                self.events.emit(ChatEvent::MessageSent {
                    conversation: self.key.clone(),
                    document_id: document_id.clone(),
                    sent_at,
                    timestamp: now_millis(),
                });
                Ok(document_id)
            }
            Err(e) => {
                self.stats.write().send_failures += 1;
                error!(conversation = %self.key, sent_at, "消息提交失败: {}", e);
                self.events.emit(ChatEvent::MessageSendFailed {
                    conversation: self.key.clone(),
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
                Err(e)
            }
        }
    }

    /// 关闭会话
    ///
    /// 释放两路订阅并等待合并任务退出；返回后不会再有任何发布。重复调用无副作用。
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shutdown.cancel();
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in &subscriptions {
            subscription.cancel();
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(conversation = %self.key, "合并任务异常退出: {}", e);
            }
        }

        info!(conversation = %self.key, "会话已关闭");
        self.events.emit(ChatEvent::ConversationClosed {
            conversation: self.key.clone(),
            timestamp: now_millis(),
        });
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn state(&self) -> SyncState {
        if self.view_rx.borrow().is_initialized() {
            SyncState::Live
        } else {
            SyncState::Uninitialized
        }
    }

    /// 当前视图
    pub fn view(&self) -> ConversationView {
        self.view_rx.borrow().clone()
    }

    pub fn watch(&self) -> ViewWatcher {
        ViewWatcher::new(self.view_rx.clone())
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 当前持有的订阅数
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().iter().filter(|s| s.is_active()).count()
    }
}

impl Drop for ChatSyncEngine {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(conversation = %self.key, "引擎被丢弃，释放订阅");
            self.shutdown.cancel();
            for subscription in self.subscriptions.get_mut().drain(..) {
                subscription.cancel();
            }
        }
    }
}
