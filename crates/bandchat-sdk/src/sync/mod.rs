//! 会话同步模块
//!
//! 职责：
//! - 合并两路实时订阅的完整快照（merge）
//! - 串行化快照应用并发布视图（engine）

pub mod engine;
pub mod merge;

pub use engine::{ChatSyncEngine, EngineStats};
pub use merge::SnapshotMerger;

/// 会话同步状态
///
/// 没有终止状态，引擎由外部关闭。
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncState {
    /// 尚未收到任何一路快照
    Uninitialized,
    /// 至少收到过一次快照（合并结果可以为空）
    Live,
}
