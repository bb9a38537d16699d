// 文件: utils/id.rs
// 作用: 原子ID生成器，为事务对象、事务本身以及信号监听器分配唯一标识
// 应用场景:
//   - 事务管理器按ID追踪对象是否处于 pending/committed 事务中
//   - Subscription 按ID从信号的监听列表中移除自身

use std::sync::atomic::{AtomicU64, Ordering};

/// 计数器，返回唯一ID。
pub struct IdCounter {
    value: AtomicU64,
}

impl IdCounter {
    pub const fn new() -> Self {
        Self {
            // 从1开始计数，0 留给“无效ID”之类的用途
            value: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        // Relaxed 足够：只需要唯一性，不需要与其他内存操作排序
        self.value.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// 为一组全局计数器生成强类型ID。
///
/// 每个ID类型拥有独立的静态计数器，不同类型的ID不会混用。
macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident, $counter:ident) => {
        static $counter: $crate::utils::id::IdCounter = $crate::utils::id::IdCounter::new();

        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// 生成下一个ID
            pub fn next() -> Self {
                Self($counter.next())
            }

            /// 获取原始ID值
            pub fn get(self) -> u64 {
                self.0
            }
        }
    };
}

pub(crate) use typed_id;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one_and_increments() {
        let counter = IdCounter::new();
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.next(), 3);
    }

    typed_id!(TestId, TEST_ID_COUNTER);

    #[test]
    fn typed_ids_are_unique() {
        let a = TestId::next();
        let b = TestId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }
}
