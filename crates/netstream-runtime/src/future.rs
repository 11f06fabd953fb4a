//! 任务结果的交付通道：[`Promise`] 写入一次，[`TaskFuture`] 观察并取走。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 线程池与调度器都需要把“任务在别的线程上完成”这件事交还给提交者；
//! - 提交者可能阻塞等待、带超时轮询、登记回调，也可能在异步代码中 `.await`。
//!
//! ## 逻辑（How）
//! - 双方共享一个 `parking_lot::Mutex` 保护的槽位与一个 `Condvar`；
//! - 兑现时先在锁内写入结局并取出回调与 waker，释放锁后再运行回调，
//!   回调因此可以安全地再次进入线程池或调度器；
//! - `Promise` 未兑现即被丢弃时，结局记为 [`TaskError::Abandoned`]。
//!
//! ## 契约（What）
//! - 结局只写入一次，且只能被取走一次；
//! - `on_ready` 登记的回调恰好运行一次：已就绪时在登记线程上立即运行，
//!   否则在兑现线程上运行。

use crate::error::TaskError;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Slot<T> {
    outcome: Option<Result<T, TaskError>>,
    completed: bool,
    callbacks: Vec<Callback>,
    waker: Option<Waker>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn complete(&self, outcome: Result<T, TaskError>) {
        let (callbacks, waker) = {
            let mut slot = self.slot.lock();
            if slot.completed {
                return;
            }
            slot.completed = true;
            slot.outcome = Some(outcome);
            (std::mem::take(&mut slot.callbacks), slot.waker.take())
        };
        self.ready.notify_all();
        for callback in callbacks {
            callback();
        }
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// 创建一对相连的 promise 与 future。
pub fn channel<T>() -> (Promise<T>, TaskFuture<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            outcome: None,
            completed: false,
            callbacks: Vec::new(),
            waker: None,
        }),
        ready: Condvar::new(),
    });
    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        TaskFuture { shared },
    )
}

/// 写入端：兑现值、报告失败，或在丢弃时记为放弃。
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    pub fn set_value(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            shared.complete(Ok(value));
        }
    }

    pub fn set_error(mut self, error: TaskError) {
        if let Some(shared) = self.shared.take() {
            shared.complete(Err(error));
        }
    }

    /// 运行 `f` 并以其结果兑现；`f` panic 时记为 [`TaskError::Panicked`]。
    pub fn run<F>(self, f: F)
    where
        F: FnOnce() -> T,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => self.set_value(value),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(message = %message, "task panicked");
                self.set_error(TaskError::Panicked(message));
            }
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.complete(Err(TaskError::Abandoned));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("pending", &self.shared.is_some())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// 观察端：阻塞等待、带超时等待、登记回调或 `.await`。
pub struct TaskFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> TaskFuture<T> {
    /// 一个已兑现的 future。
    pub fn ready(value: T) -> Self {
        let (promise, future) = channel();
        promise.set_value(value);
        future
    }

    pub fn is_ready(&self) -> bool {
        self.shared.slot.lock().completed
    }

    /// 阻塞到结局就绪并取走它。
    pub fn wait(self) -> Result<T, TaskError> {
        let mut slot = self.shared.slot.lock();
        while !slot.completed {
            self.shared.ready.wait(&mut slot);
        }
        slot.outcome.take().unwrap_or(Err(TaskError::Abandoned))
    }

    /// 最多等待 `timeout`，返回结局是否已经就绪。
    ///
    /// 超出 `Instant` 表示范围的 `timeout` 视为不限时。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.shared.slot.lock();
        while !slot.completed {
            match deadline {
                Some(deadline) => {
                    if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                        return slot.completed;
                    }
                }
                None => self.shared.ready.wait(&mut slot),
            }
        }
        true
    }

    /// 就绪时取走结局；未就绪或已被取走时返回 `None`。
    pub fn try_take(&self) -> Option<Result<T, TaskError>> {
        self.shared.slot.lock().outcome.take()
    }

    /// 登记一个就绪回调。
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.shared.slot.lock();
        if slot.completed {
            drop(slot);
            callback();
        } else {
            slot.callbacks.push(Box::new(callback));
        }
    }
}

impl<T> Future for TaskFuture<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        if slot.completed {
            return Poll::Ready(slot.outcome.take().unwrap_or(Err(TaskError::Abandoned)));
        }
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::task::Wake;
    use std::thread;

    struct ThreadWaker(thread::Thread);

    impl Wake for ThreadWaker {
        fn wake(self: Arc<Self>) {
            self.0.unpark();
        }
    }

    fn block_on<F: Future>(future: F) -> F::Output {
        let mut future = std::pin::pin!(future);
        let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
        let mut cx = Context::from_waker(&waker);
        loop {
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(output) => return output,
                Poll::Pending => thread::park(),
            }
        }
    }

    #[test]
    fn value_crosses_threads() {
        let (promise, future) = channel();
        thread::spawn(move || promise.set_value(42));
        assert_eq!(future.wait(), Ok(42));
    }

    #[test]
    fn dropped_promise_abandons() {
        let (promise, future) = channel::<u8>();
        drop(promise);
        assert!(future.is_ready());
        assert_eq!(future.wait(), Err(TaskError::Abandoned));
    }

    #[test]
    fn panics_are_captured() {
        let (promise, future) = channel::<()>();
        promise.run(|| panic!("boom"));
        assert_eq!(future.wait(), Err(TaskError::Panicked("boom".to_string())));
    }

    #[test]
    fn wait_timeout_reports_readiness() {
        let (promise, future) = channel();
        assert!(!future.wait_timeout(Duration::from_millis(20)));
        promise.set_value("done");
        assert!(future.wait_timeout(Duration::from_millis(20)));
        assert_eq!(future.try_take(), Some(Ok("done")));
        assert_eq!(future.try_take(), None);
    }

    #[test]
    fn unbounded_wait_timeout_returns_once_ready() {
        assert!(TaskFuture::ready(3u8).wait_timeout(Duration::MAX));

        let (promise, future) = channel();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.set_value(9u8);
        });
        assert!(future.wait_timeout(Duration::MAX));
        assert_eq!(future.try_take(), Some(Ok(9)));
        producer.join().unwrap();
    }

    #[test]
    fn callbacks_run_exactly_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (promise, future) = channel::<()>();
        let counter = Arc::clone(&hits);
        future.on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        promise.set_value(());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // 已就绪时在登记线程上立即运行。
        let (tx, rx) = mpsc::channel();
        future.on_ready(move || tx.send(thread::current().id()).unwrap());
        assert_eq!(rx.recv().unwrap(), thread::current().id());
    }

    #[test]
    fn awaits_as_a_std_future() {
        let (promise, future) = channel();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.set_value(7u32);
        });
        assert_eq!(block_on(future), Ok(7));
        producer.join().unwrap();
        assert_eq!(block_on(TaskFuture::ready(1)), Ok(1));
    }
}
