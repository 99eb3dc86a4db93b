//! 会话管理
//!
//! 面向 UI 的调用入口：按参与方对打开/关闭会话，发送前做空消息检查，
//! 并在构造消息时通过参与方目录解析一次显示名。

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ChatSyncConfig;
use crate::error::{BandchatError, Result};
use crate::events::EventManager;
use crate::message::{ConversationKey, DocumentId, PartyId};
use crate::store::{DocumentStore, PartyDirectory};
use crate::sync::ChatSyncEngine;
use crate::utils::{Clock, SystemClock};

/// 会话管理器
pub struct ConversationManager {
    store: Arc<dyn DocumentStore>,
    directory: Arc<dyn PartyDirectory>,
    events: Arc<EventManager>,
    config: ChatSyncConfig,
    clock: Arc<dyn Clock>,
    /// 每个参与方对最多一个引擎
    conversations: Mutex<HashMap<ConversationKey, Arc<ChatSyncEngine>>>,
}

impl ConversationManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        directory: Arc<dyn PartyDirectory>,
        config: ChatSyncConfig,
    ) -> Self {
        Self::with_clock(store, directory, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn DocumentStore>,
        directory: Arc<dyn PartyDirectory>,
        config: ChatSyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let events = Arc::new(EventManager::new(config.event_buffer_size));
        Self {
            store,
            directory,
            events,
            config,
            clock,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> Arc<EventManager> {
        self.events.clone()
    }

    pub fn config(&self) -> &ChatSyncConfig {
        &self.config
    }

    /// 打开会话，已打开的会话直接返回现有引擎
    pub async fn open(&self, local: PartyId, remote: PartyId) -> Result<Arc<ChatSyncEngine>> {
        let key = ConversationKey { local, remote };
        let mut conversations = self.conversations.lock().await;

        if let Some(engine) = conversations.get(&key) {
            debug!(conversation = %key, "会话已打开，复用引擎");
            return Ok(engine.clone());
        }

        let engine = Arc::new(
            ChatSyncEngine::open(
                key.clone(),
                self.store.clone(),
                self.events.clone(),
                self.config.clone(),
                self.clock.clone(),
            )
            .await?,
        );
        conversations.insert(key, engine.clone());
        Ok(engine)
    }

    pub async fn get(&self, key: &ConversationKey) -> Option<Arc<ChatSyncEngine>> {
        self.conversations.lock().await.get(key).cloned()
    }

    /// 发送文本消息
    ///
    /// 空消息在这里被拒绝（可通过配置关闭），引擎本身不再校验。
    pub async fn send_text(&self, key: &ConversationKey, body: &str) -> Result<DocumentId> {
        if self.config.reject_empty_body && body.trim().is_empty() {
            return Err(BandchatError::InvalidInput("message body is empty".to_string()));
        }

        let engine = self
            .get(key)
            .await
            .ok_or_else(|| BandchatError::NotFound(format!("conversation {}", key)))?;

        // 显示名只在构造消息时解析一次
        let sender = self.directory.resolve(&key.local).await?;
        let receiver = self.directory.resolve(&key.remote).await?;

        engine.send_message(body, &sender, &receiver).await
    }

    /// 关闭会话，返回该会话此前是否处于打开状态
    pub async fn close(&self, key: &ConversationKey) -> bool {
        let engine = self.conversations.lock().await.remove(key);
        match engine {
            Some(engine) => {
                engine.close().await;
                true
            }
            None => {
                warn!(conversation = %key, "关闭未打开的会话");
                false
            }
        }
    }

    /// 并发关闭所有会话
    pub async fn close_all(&self) {
        let engines: Vec<Arc<ChatSyncEngine>> = {
            let mut conversations = self.conversations.lock().await;
            conversations.drain().map(|(_, engine)| engine).collect()
        };

        let count = engines.len();
        join_all(engines.iter().map(|engine| engine.close())).await;
        info!("已关闭 {} 个会话", count);
    }

    pub async fn open_conversations(&self) -> Vec<ConversationKey> {
        self.conversations.lock().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Party;
    use crate::store::{MemoryDocumentStore, MemoryPartyDirectory};
    use crate::utils::ManualClock;
    use std::time::Duration;
    use tokio::time::timeout;

    fn setup(config: ChatSyncConfig) -> (ConversationManager, MemoryDocumentStore, Arc<MemoryPartyDirectory>) {
        let store = MemoryDocumentStore::new();
        let directory = Arc::new(MemoryPartyDirectory::with_parties([
            Party::user("u1", "Alice"),
            Party::user("u2", "Bob"),
            Party::band("b1", "The Lints"),
        ]));
        let manager = ConversationManager::with_clock(
            Arc::new(store.clone()),
            directory.clone(),
            config,
            Arc::new(ManualClock::with_step(1_000, 10)),
        );
        (manager, store, directory)
    }

    #[tokio::test]
    async fn test_open_reuses_engine() {
        let (manager, store, _) = setup(ChatSyncConfig::default());

        let first = manager.open("u1".into(), "u2".into()).await.unwrap();
        let second = manager.open("u1".into(), "u2".into()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.listener_count(), 2);

        // 反方向是另一个会话视角
        manager.open("u2".into(), "u1".into()).await.unwrap();
        assert_eq!(manager.open_conversations().await.len(), 2);
        assert_eq!(store.listener_count(), 4);
    }

    #[tokio::test]
    async fn test_empty_body_rejected_before_engine() {
        let (manager, store, _) = setup(ChatSyncConfig::default());
        let key = ConversationKey::new("u1", "u2");
        manager.open(key.local.clone(), key.remote.clone()).await.unwrap();

        for body in ["", "   ", "\n\t"] {
            let err = manager.send_text(&key, body).await.unwrap_err();
            assert!(matches!(err, BandchatError::InvalidInput(_)));
        }
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_body_allowed_when_guard_disabled() {
        let config = ChatSyncConfig::builder().reject_empty_body(false).build().unwrap();
        let (manager, store, _) = setup(config);
        let key = ConversationKey::new("u1", "u2");
        manager.open(key.local.clone(), key.remote.clone()).await.unwrap();

        assert!(manager.send_text(&key, "").await.is_ok());
        assert_eq!(store.document_count(), 1);
    }

    #[tokio::test]
    async fn test_send_text_resolves_names_at_send_time() {
        let (manager, _store, directory) = setup(ChatSyncConfig::default());
        let key = ConversationKey::new("u1", "b1");
        let engine = manager.open(key.local.clone(), key.remote.clone()).await.unwrap();

        manager.send_text(&key, "first").await.unwrap();
        directory.rename(&"b1".into(), "The Borrow Checkers").unwrap();
        manager.send_text(&key, "second").await.unwrap();

        let mut watcher = engine.watch();
        let view = timeout(Duration::from_secs(2), watcher.wait_for(|v| v.len() == 2))
            .await
            .unwrap()
            .unwrap();

        // 已发送的消息保留发送时的显示名
        assert_eq!(view.bodies(), vec!["first", "second"]);
        assert_eq!(view.messages[0].receiver_name, "The Lints");
        assert_eq!(view.messages[1].receiver_name, "The Borrow Checkers");
    }

    #[tokio::test]
    async fn test_send_text_errors() {
        let (manager, _store, _) = setup(ChatSyncConfig::default());

        let unknown = ConversationKey::new("u1", "u2");
        assert!(matches!(
            manager.send_text(&unknown, "hi").await,
            Err(BandchatError::NotFound(_))
        ));

        let stranger = ConversationKey::new("u1", "ghost");
        manager.open(stranger.local.clone(), stranger.remote.clone()).await.unwrap();
        assert!(matches!(
            manager.send_text(&stranger, "hi").await,
            Err(BandchatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_and_close_all() {
        let (manager, store, _) = setup(ChatSyncConfig::default());
        let key = ConversationKey::new("u1", "u2");
        let engine = manager.open(key.local.clone(), key.remote.clone()).await.unwrap();
        manager.open("u1".into(), "b1".into()).await.unwrap();

        assert!(manager.close(&key).await);
        assert!(engine.is_closed());
        assert!(!manager.close(&key).await);
        assert_eq!(store.listener_count(), 2);

        manager.close_all().await;
        assert!(manager.open_conversations().await.is_empty());
        assert_eq!(store.listener_count(), 0);

        let stats = manager.events().get_stats();
        assert_eq!(stats.events_by_type.get("conversation_closed"), Some(&2));
    }
}
