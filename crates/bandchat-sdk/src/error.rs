use thiserror::Error;

/// SDK 统一错误类型
///
/// 只携带字符串描述，方便在订阅回调、事件和跨任务边界之间克隆传递。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BandchatError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// 文档存储写入/查询失败
    #[error("Store error: {0}")]
    Store(String),
    /// 实时订阅投递失败
    #[error("Subscription error: {0}")]
    Subscription(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    /// 会话已关闭
    #[error("Conversation closed: {0}")]
    Closed(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    JsonError(String),
}

impl From<serde_json::Error> for BandchatError {
    fn from(error: serde_json::Error) -> Self {
        BandchatError::JsonError(error.to_string())
    }
}

impl BandchatError {
    /// 是否属于调用方可以自行重试的错误
    ///
    /// 同步引擎本身从不重试，这里只是给上层一个判断依据。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BandchatError::Store(_) | BandchatError::Timeout(_) | BandchatError::Subscription(_)
        )
    }

    /// 是否因为会话已关闭而失败
    pub fn is_closed(&self) -> bool {
        matches!(self, BandchatError::Closed(_))
    }
}

pub type Result<T> = std::result::Result<T, BandchatError>;
