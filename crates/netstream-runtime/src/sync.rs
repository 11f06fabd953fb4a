//! 取一次（take-once）仲裁。
//!
//! 延迟任务同时被两方持有：依赖完成时触发的回调与线程池的清理路径（`clear` 或析构）。
//! 双方都调用 [`TakeOnce::take`]，原子标志保证恰好一方拿到任务，另一方得到 `None`。
//! 在 `cfg(loom)` 下标志与槽位换成 loom 的模型类型，以便穷举两方的交错。

#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(loom))]
struct Slot<T>(parking_lot::Mutex<Option<T>>);

#[cfg(not(loom))]
impl<T> Slot<T> {
    fn new(value: T) -> Self {
        Self(parking_lot::Mutex::new(Some(value)))
    }

    fn take(&self) -> Option<T> {
        self.0.lock().take()
    }
}

#[cfg(loom)]
struct Slot<T>(loom::sync::Mutex<Option<T>>);

#[cfg(loom)]
impl<T> Slot<T> {
    fn new(value: T) -> Self {
        Self(loom::sync::Mutex::new(Some(value)))
    }

    fn take(&self) -> Option<T> {
        match self.0.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// 只能被取出一次的值。
pub struct TakeOnce<T> {
    taken: AtomicBool,
    slot: Slot<T>,
}

impl<T> TakeOnce<T> {
    pub fn new(value: T) -> Self {
        Self {
            taken: AtomicBool::new(false),
            slot: Slot::new(value),
        }
    }

    /// 第一个调用者得到值，其余调用者得到 `None`。
    pub fn take(&self) -> Option<T> {
        if self.taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.slot.take()
    }

    pub fn is_taken(&self) -> bool {
        self.taken.load(Ordering::Acquire)
    }
}

impl<T> std::fmt::Debug for TakeOnce<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TakeOnce")
            .field("taken", &self.is_taken())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_taker_wins() {
        let cell = TakeOnce::new(7);
        assert!(!cell.is_taken());
        assert_eq!(cell.take(), Some(7));
        assert_eq!(cell.take(), None);
        assert!(cell.is_taken());
    }
}
