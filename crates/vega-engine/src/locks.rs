//! 键级读写锁表。
//!
//! # 模块定位（Why）
//! - 清扫器要在不阻塞其他卫星读路径的前提下证明某颗卫星当前无人使用；
//!   单一全局锁做不到这一点，因此按句柄维护独立的读写锁；
//! - 传播期间持读锁（门闸已保证实际只有一个读者，读锁的意义是让驱逐的
//!   写获取被在途传播阻塞），创建/初始化/销毁期间持写锁。
//!
//! # 行为契约（What）
//! - 懒插入、永不收缩：锁条目随首次访问出现，之后常驻。每个条目只有一个
//!   `RwLock<()>`，泄漏上界为历史句柄数，可忽略；
//! - 表本身并发安全，查询/插入原子。

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::adapter::SatKey;

/// 句柄到读写锁的并发映射。
#[derive(Debug, Default)]
pub struct KeyLockTable {
    locks: DashMap<SatKey, Arc<RwLock<()>>>,
}

impl KeyLockTable {
    /// 创建空表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得（或懒创建）某句柄的锁；返回的 `Arc` 可跨 `await` 持有。
    pub fn lock_for(&self, key: SatKey) -> Arc<RwLock<()>> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// 当前登记的锁条目数，仅用于诊断。
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// 表是否为空。
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_yields_the_same_lock() {
        let table = KeyLockTable::new();
        let a = table.lock_for(SatKey::new(7));
        let b = table.lock_for(SatKey::new(7));
        assert!(Arc::ptr_eq(&a, &b), "同一句柄应共享同一把锁");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_locks() {
        let table = KeyLockTable::new();
        let a = table.lock_for(SatKey::new(1));
        let b = table.lock_for(SatKey::new(2));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn readers_share_while_writer_excludes() {
        let table = KeyLockTable::new();
        let lock = table.lock_for(SatKey::new(9));
        let r1 = lock.clone().read_owned().await;
        let r2 = lock.clone().try_read_owned();
        assert!(r2.is_ok(), "读锁之间应共享");
        assert!(
            lock.clone().try_write_owned().is_err(),
            "持读期间写获取应失败"
        );
        drop(r1);
        drop(r2);
        assert!(lock.try_write_owned().is_ok());
    }
}
