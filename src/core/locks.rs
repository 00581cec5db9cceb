//! 按键互斥：同一 (userId, competencyTargetName) 的运行串行执行
//!
//! 每个键一把 tokio Mutex，持有期间为整个 run；没有持有者的条目在下次加锁时清理。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// 运行键
pub fn run_key(user_id: &str, competency_target_name: &str) -> String {
    format!("{user_id}\u{1f}{competency_target_name}")
}

#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取键对应的锁，返回的 guard 释放前同键的其他调用会等待
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // 只剩表内引用的条目没有持有者也没有等待者
            locks.retain(|k, l| k == key || Arc::strong_count(l) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// 当前登记的键数量
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
