//! 会话视图
//!
//! 视图只是两路快照合并后的投影，从不作为数据源；每次发布都是两路最新快照的并集。

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{BandchatError, Result};
use crate::message::Message;

/// UI 读取的有序消息列表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    /// 发布版本号，0 表示尚未收到任何快照
    pub revision: u64,
    /// 按 sent_at 升序
    pub messages: Vec<Message>,
}

impl ConversationView {
    pub fn is_initialized(&self) -> bool {
        self.revision > 0
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn bodies(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.body.as_str()).collect()
    }
}

/// 视图观察者
///
/// 只保证看到最新一次发布，中间状态可能被跳过。
#[derive(Clone)]
pub struct ViewWatcher {
    receiver: watch::Receiver<ConversationView>,
}

impl ViewWatcher {
    /// 新观察者从当前版本开始，只关心之后的发布
    pub(crate) fn new(mut receiver: watch::Receiver<ConversationView>) -> Self {
        receiver.borrow_and_update();
        Self { receiver }
    }

    pub fn current(&self) -> ConversationView {
        self.receiver.borrow().clone()
    }

    /// 等待下一次发布，引擎销毁后返回 Closed
    pub async fn changed(&mut self) -> Result<ConversationView> {
        self.receiver
            .changed()
            .await
            .map_err(|_| BandchatError::Closed("view publisher dropped".to_string()))?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// 等待满足条件的视图（包括当前视图）
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Result<ConversationView>
    where
        F: FnMut(&ConversationView) -> bool,
    {
        let view = self
            .receiver
            .wait_for(|view| predicate(view))
            .await
            .map_err(|_| BandchatError::Closed("view publisher dropped".to_string()))?;
        Ok(view.clone())
    }
}
