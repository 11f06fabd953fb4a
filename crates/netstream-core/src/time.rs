//! 单调时钟抽象与截止时间。
//!
//! 后端的多步操作（依次尝试多个解析地址、TLS 握手往返、`close_notify` 交换）
//! 共享一个截止时间，而不是让每一步各自重新计时。

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 可注入的单调时钟。
///
/// 实现者必须保证 `now` 单调不减。
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// 直接读取 [`Instant::now`] 的系统时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 返回进程共享的系统时钟句柄。
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// 基于某个时钟计算的截止时间。
#[derive(Clone)]
pub struct Deadline {
    clock: Arc<dyn Clock>,
    at: Instant,
}

impl Deadline {
    /// 从当前时刻起经过 `budget` 后到期。
    pub fn after(clock: Arc<dyn Clock>, budget: Duration) -> Self {
        let now = clock.now();
        let at = now.checked_add(budget).unwrap_or(now + Duration::from_secs(86_400 * 365));
        Self { clock, at }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// 剩余时长；已到期时返回 `None`。
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.at.saturating_duration_since(self.clock.now());
        (!left.is_zero()).then_some(left)
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_none()
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadline").field("at", &self.at).finish()
    }
}
