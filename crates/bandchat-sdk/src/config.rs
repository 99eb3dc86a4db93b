//! 同步引擎配置

use serde::{Deserialize, Serialize};

use crate::error::{BandchatError, Result};

/// 去重策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// 以存储层分配的 document_id 去重；尚未确认的消息退化为 (sender, sent_at, body) 复合键，
    /// 确认后与已确认的同一条消息合并
    #[default]
    Identity,
    /// 仅以 sent_at 去重，后合并的覆盖先合并的
    ///
    /// 同一毫秒内的两条不同消息会被折叠成一条，仅用于兼容旧客户端的行为。
    SentAtOnly,
}

/// 同步引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSyncConfig {
    /// 去重策略
    pub dedup_policy: DedupPolicy,
    /// 发送超时（毫秒），None 表示等待存储层自行返回
    pub send_timeout_ms: Option<u64>,
    /// 事件广播缓冲区大小
    pub event_buffer_size: usize,
    /// 调用方是否拒绝空消息体（引擎本身不校验）
    pub reject_empty_body: bool,
    /// 日志级别：trace / debug / info / warn / error
    pub log_level: String,
}

impl Default for ChatSyncConfig {
    fn default() -> Self {
        Self {
            dedup_policy: DedupPolicy::Identity,
            send_timeout_ms: None,
            event_buffer_size: 256,
            reject_empty_body: true,
            log_level: "info".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl ChatSyncConfig {
    pub fn builder() -> ChatSyncConfigBuilder {
        ChatSyncConfigBuilder::new()
    }

    /// 从 JSON 解析配置，缺省字段取默认值
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ChatSyncConfig = serde_json::from_str(json)
            .map_err(|e| BandchatError::Config(format!("invalid config json: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(BandchatError::Config(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(BandchatError::Config(format!(
                "unknown log level: {}",
                self.log_level
            )));
        }
        Ok(())
    }
}

/// 配置构建器
pub struct ChatSyncConfigBuilder {
    config: ChatSyncConfig,
}

impl ChatSyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ChatSyncConfig::default(),
        }
    }

    pub fn dedup_policy(mut self, policy: DedupPolicy) -> Self {
        self.config.dedup_policy = policy;
        self
    }

    pub fn send_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.send_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn reject_empty_body(mut self, reject: bool) -> Self {
        self.config.reject_empty_body = reject;
        self
    }

    pub fn log_level<S: Into<String>>(mut self, level: S) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// 构建并校验配置
    pub fn build(self) -> Result<ChatSyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ChatSyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = ChatSyncConfig::builder()
            .dedup_policy(DedupPolicy::SentAtOnly)
            .send_timeout_ms(3000)
            .event_buffer_size(16)
            .reject_empty_body(false)
            .log_level("debug")
            .build()
            .unwrap();

        assert_eq!(config.dedup_policy, DedupPolicy::SentAtOnly);
        assert_eq!(config.send_timeout_ms, Some(3000));
        assert_eq!(config.event_buffer_size, 16);
        assert!(!config.reject_empty_body);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        let err = ChatSyncConfig::builder().event_buffer_size(0).build().unwrap_err();
        assert!(matches!(err, BandchatError::Config(_)));

        let err = ChatSyncConfig::builder().log_level("loud").build().unwrap_err();
        assert!(matches!(err, BandchatError::Config(_)));
    }

    #[test]
    fn test_from_json_partial() {
        let config = ChatSyncConfig::from_json_str(r#"{"dedup_policy":"sent_at_only"}"#).unwrap();
        assert_eq!(config.dedup_policy, DedupPolicy::SentAtOnly);
        assert_eq!(config.event_buffer_size, 256);
        assert!(config.reject_empty_body);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = ChatSyncConfig::from_json_str(r#"{"log_level":"loud"}"#).unwrap_err();
        assert!(matches!(err, BandchatError::Config(_)));

        let err = ChatSyncConfig::from_json_str(r#"{"event_buffer_size":0}"#).unwrap_err();
        assert!(matches!(err, BandchatError::Config(_)));

        let err = ChatSyncConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, BandchatError::Config(_)));
    }
}
