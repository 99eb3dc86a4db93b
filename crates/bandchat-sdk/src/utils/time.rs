//! 时间工具
//!
//! 所有时间字段统一使用 UTC 毫秒时间戳（i64），与 `Utc::now().timestamp_millis()` 一致。
//! 发送时间 `sent_at` 同时用于排序，因此时钟做成可替换的 trait，测试里用 [`ManualClock`]。

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// 时钟抽象
pub trait Clock: Send + Sync {
    /// 当前时间（UTC 毫秒）
    fn now_millis(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// 当前墙钟时间（UTC 毫秒），用于事件时间戳
pub fn now_millis() -> i64 {
    SystemClock.now_millis()
}

/// 手动时钟
///
/// 每次读取后可选自动前进 `step` 毫秒，方便构造递增的发送时间。
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
    step: i64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self::with_step(start_millis, 0)
    }

    pub fn with_step(start_millis: i64, step: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
            step,
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_steps() {
        let clock = ManualClock::with_step(100, 10);
        assert_eq!(clock.now_millis(), 100);
        assert_eq!(clock.now_millis(), 110);

        clock.set(500);
        assert_eq!(clock.now_millis(), 500);

        let fixed = ManualClock::new(42);
        fixed.advance(8);
        assert_eq!(fixed.now_millis(), 50);
        assert_eq!(fixed.now_millis(), 50);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01 之后
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
