//! 事件系统
//!
//! 功能包括：
//! - 会话打开/关闭事件
//! - 视图发布事件
//! - 订阅投递失败事件
//! - 发送成功/失败事件
//! - 事件广播和监听器机制

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::message::{ConversationKey, DocumentId, StreamId};

/// SDK 事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatEvent {
    ConversationOpened {
        conversation: ConversationKey,
        timestamp: i64,
    },
    /// 视图发布了新版本
    ViewUpdated {
        conversation: ConversationKey,
        revision: u64,
        message_count: usize,
        timestamp: i64,
    },
    /// 订阅投递失败（已忽略，视图保持不变）
    SnapshotFailed {
        conversation: ConversationKey,
        stream: StreamId,
        error: String,
        timestamp: i64,
    },
    MessageSent {
        conversation: ConversationKey,
        document_id: DocumentId,
        sent_at: i64,
        timestamp: i64,
    },
    MessageSendFailed {
        conversation: ConversationKey,
        error: String,
        timestamp: i64,
    },
    ConversationClosed {
        conversation: ConversationKey,
        timestamp: i64,
    },
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::ConversationOpened { .. } => "conversation_opened",
            ChatEvent::ViewUpdated { .. } => "view_updated",
            ChatEvent::SnapshotFailed { .. } => "snapshot_failed",
            ChatEvent::MessageSent { .. } => "message_sent",
            ChatEvent::MessageSendFailed { .. } => "message_send_failed",
            ChatEvent::ConversationClosed { .. } => "conversation_closed",
        }
    }

    pub fn conversation(&self) -> &ConversationKey {
        match self {
            ChatEvent::ConversationOpened { conversation, .. }
            | ChatEvent::ViewUpdated { conversation, .. }
            | ChatEvent::SnapshotFailed { conversation, .. }
            | ChatEvent::MessageSent { conversation, .. }
            | ChatEvent::MessageSendFailed { conversation, .. }
            | ChatEvent::ConversationClosed { conversation, .. } => conversation,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            ChatEvent::ConversationOpened { timestamp, .. }
            | ChatEvent::ViewUpdated { timestamp, .. }
            | ChatEvent::SnapshotFailed { timestamp, .. }
            | ChatEvent::MessageSent { timestamp, .. }
            | ChatEvent::MessageSendFailed { timestamp, .. }
            | ChatEvent::ConversationClosed { timestamp, .. } => *timestamp,
        }
    }
}

type EventListener = Box<dyn Fn(&ChatEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub listener_count: usize,
    pub last_event_time: Option<i64>,
}

/// 事件管理器
///
/// 事件在引擎的合并任务中同步发出，监听器应尽快返回。
pub struct EventManager {
    sender: broadcast::Sender<ChatEvent>,
    /// 事件类型 -> 监听器，"*" 表示全部事件
    listeners: Arc<parking_lot::RwLock<HashMap<String, Vec<EventListener>>>>,
    stats: Arc<parking_lot::RwLock<EventStats>>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            stats: Arc::new(parking_lot::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: ChatEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 没有订阅者时 send 会失败，属正常情况
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read();
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }
        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }

    /// 添加事件监听器
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Box::new(listener));

        self.stats.write().listener_count = listeners.values().map(|v| v.len()).sum();
        info!("Added listener for event type: {}", event_type);
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.write().listener_count = 0;
        info!("Cleared all event listeners");
    }

    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}
