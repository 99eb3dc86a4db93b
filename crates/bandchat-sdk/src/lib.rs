//! Bandchat SDK - 双人会话同步引擎
//!
//! 本 SDK 负责把文档存储中的两路实时订阅合并成一个会话视图：
//! - 🔗 两路订阅：本端发出 / 对端发出，每次推送完整快照
//! - 🧠 单写者合并：快照串行应用，视图有序、无重复
//! - 📡 视图发布：UI 只需观察最新版本
//! - ✉️ 消息发送：写入文档存储，随订阅回到视图（不做乐观插入）
//! - ⚙️ 事件系统：会话打开/关闭、视图更新、发送结果
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bandchat_sdk::{
//!     ChatSyncConfig, ConversationKey, ConversationManager, MemoryDocumentStore,
//!     MemoryPartyDirectory, Party,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChatSyncConfig::builder().log_level("info").build()?;
//!     bandchat_sdk::init_logging_from(&config)?;
//!
//!     let directory = MemoryPartyDirectory::with_parties([
//!         Party::user("u1", "Alice"),
//!         Party::band("b1", "The Lints"),
//!     ]);
//!     let manager = ConversationManager::new(
//!         Arc::new(MemoryDocumentStore::new()),
//!         Arc::new(directory),
//!         config,
//!     );
//!
//!     // 打开会话并观察视图
//!     let engine = manager.open("u1".into(), "b1".into()).await?;
//!     let mut watcher = engine.watch();
//!
//!     // 发送消息
//!     let key = ConversationKey::new("u1", "b1");
//!     manager.send_text(&key, "Hello, band!").await?;
//!
//!     let view = watcher.wait_for(|v| !v.is_empty()).await?;
//!     println!("{:?}", view.bodies());
//!
//!     // 关闭会话，释放订阅
//!     manager.close(&key).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod message;
pub mod session;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod utils;
pub mod view;

pub use config::{ChatSyncConfig, ChatSyncConfigBuilder, DedupPolicy};
pub use error::{BandchatError, Result};
pub use events::{ChatEvent, EventManager, EventStats};
pub use logging::{init_logging, init_logging_from};
pub use message::{
    ConversationKey, DocumentId, Message, MessageKey, Party, PartyId, PartyKind, StreamId,
};
pub use session::ConversationManager;
pub use store::{
    DocumentStore, MemoryDocumentStore, MemoryPartyDirectory, MessageQuery, PartyDirectory,
    SnapshotSink,
};
pub use subscription::Subscription;
pub use sync::{ChatSyncEngine, EngineStats, SnapshotMerger, SyncState};
pub use utils::{Clock, ManualClock, SystemClock};
pub use view::{ConversationView, ViewWatcher};
