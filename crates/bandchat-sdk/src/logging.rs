//! 日志初始化

use std::str::FromStr;

use tracing::{debug, Level};

use crate::config::ChatSyncConfig;
use crate::error::{BandchatError, Result};

/// 安装全局 fmt 日志订阅者
///
/// 已经安装过订阅者时直接返回 Ok。
pub fn init_logging(level: &str) -> Result<()> {
    let level = Level::from_str(level)
        .map_err(|_| BandchatError::Config(format!("unknown log level: {}", level)))?;

    if tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_err()
    {
        debug!("日志订阅者已存在，跳过初始化");
    }
    Ok(())
}

/// 按配置中的 `log_level` 初始化日志
pub fn init_logging_from(config: &ChatSyncConfig) -> Result<()> {
    init_logging(&config.log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        assert!(init_logging("debug").is_ok());
        assert!(init_logging("info").is_ok());
    }

    #[test]
    fn test_init_logging_rejects_unknown_level() {
        assert!(matches!(init_logging("chatty"), Err(BandchatError::Config(_))));
    }

    #[test]
    fn test_init_logging_from_config() {
        let config = ChatSyncConfig::builder().log_level("warn").build().unwrap();
        assert!(init_logging_from(&config).is_ok());

        // 绕过构建器校验的非法级别同样被拒绝
        let config = ChatSyncConfig {
            log_level: "chatty".to_string(),
            ..ChatSyncConfig::default()
        };
        assert!(matches!(init_logging_from(&config), Err(BandchatError::Config(_))));
    }
}
