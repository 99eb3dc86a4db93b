//! 实时订阅句柄
//!
//! 订阅的生命周期与句柄绑定：显式 `cancel()` 或句柄被丢弃时释放监听器，且只释放一次。

use parking_lot::Mutex;
use std::fmt;

type Unsubscribe = Box<dyn FnOnce() + Send>;

pub struct Subscription {
    label: String,
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    pub fn new<S, F>(label: S, unsubscribe: F) -> Self
    where
        S: Into<String>,
        F: FnOnce() + Send + 'static,
    {
        Self {
            label: label.into(),
            unsubscribe: Mutex::new(Some(Box::new(unsubscribe))),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        self.unsubscribe.lock().is_some()
    }

    /// 释放监听器，重复调用无副作用
    pub fn cancel(&self) {
        let unsubscribe = self.unsubscribe.lock().take();
        if let Some(unsubscribe) = unsubscribe {
            tracing::debug!(subscription = %self.label, "取消订阅");
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}
