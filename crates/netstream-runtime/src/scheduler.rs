//! 单线程定时调度器：按到期时间（同时到期按登记顺序）依次运行任务。

use crate::error::RuntimeError;
use crate::future::{self, TaskFuture};
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

struct Entry {
    due: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        (self.due, self.seq) == (other.due, other.seq)
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

struct Queue {
    entries: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    shutdown: bool,
}

struct Inner {
    queue: Mutex<Queue>,
    changed: Condvar,
}

impl Inner {
    fn run(&self) {
        loop {
            let job = {
                let mut queue = self.queue.lock();
                loop {
                    if queue.shutdown {
                        return;
                    }
                    let next_due = queue.entries.peek().map(|Reverse(entry)| entry.due);
                    match next_due {
                        None => self.changed.wait(&mut queue),
                        Some(due) if due <= Instant::now() => {
                            if let Some(Reverse(entry)) = queue.entries.pop() {
                                break entry.job;
                            }
                        }
                        Some(due) => {
                            self.changed.wait_until(&mut queue, due);
                        }
                    }
                }
            };
            job();
        }
    }
}

/// 由一个后台线程服务的定时任务队列。
pub struct Scheduler {
    inner: Arc<Inner>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Result<Self, RuntimeError> {
        let inner = Arc::new(Inner {
            queue: Mutex::new(Queue {
                entries: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            changed: Condvar::new(),
        });
        let worker = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name("netstream-scheduler".to_string())
            .spawn(move || worker.run())?;
        Ok(Self {
            inner,
            thread: Some(thread),
        })
    }

    /// 在 `when` 时刻运行 `f`；已过去的时刻立即到期。
    pub fn add_at<F, T>(&self, when: Instant, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (promise, future) = future::channel();
        let job: Job = Box::new(move || promise.run(f));
        let mut queue = self.inner.queue.lock();
        if queue.shutdown {
            drop(queue);
            drop(job);
            return future;
        }
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.entries.push(Reverse(Entry {
            due: when,
            seq,
            job,
        }));
        drop(queue);
        // 新条目可能早于当前等待的截止时间。
        self.inner.changed.notify_one();
        future
    }

    /// 在 `delay` 之后运行 `f`；超出 `Instant` 表示范围的延迟按一年计。
    pub fn add_after<F, T>(&self, delay: Duration, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let now = Instant::now();
        let due = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);
        self.add_at(due, f)
    }

    /// 取消所有尚未到期的条目，其 future 记为放弃；返回取消的数量。
    pub fn clear(&self) -> usize {
        let entries = std::mem::take(&mut self.inner.queue.lock().entries);
        let cancelled = entries.len();
        drop(entries);
        tracing::debug!(cancelled, "scheduler cleared");
        cancelled
    }

    /// 尚未运行的条目数。
    pub fn len(&self) -> usize {
        self.inner.queue.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let entries = {
            let mut queue = self.inner.queue.lock();
            queue.shutdown = true;
            std::mem::take(&mut queue.entries)
        };
        drop(entries);
        self.inner.changed.notify_all();
        if let Some(thread) = self.thread.take()
            && thread.thread().id() != thread::current().id()
            && thread.join().is_err()
        {
            tracing::warn!("scheduler thread exited by panic");
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::TaskError;

    #[test]
    fn equal_deadlines_keep_insertion_order() {
        let scheduler = Scheduler::new().unwrap();
        let when = Instant::now() + Duration::from_millis(30);
        let log = Arc::new(Mutex::new(Vec::new()));
        let futures: Vec<_> = (0..4)
            .map(|i| {
                let log = Arc::clone(&log);
                scheduler.add_at(when, move || log.lock().push(i))
            })
            .collect();
        for future in futures {
            assert_eq!(future.wait(), Ok(()));
        }
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn dropping_cancels_pending_entries() {
        let scheduler = Scheduler::new().unwrap();
        let future = scheduler.add_after(Duration::from_secs(60), || ());
        assert_eq!(scheduler.len(), 1);
        drop(scheduler);
        assert_eq!(future.wait(), Err(TaskError::Abandoned));
    }

    #[test]
    fn unbounded_delay_is_queued_not_fired() {
        let scheduler = Scheduler::new().unwrap();
        let future = scheduler.add_after(Duration::MAX, || ());
        assert_eq!(scheduler.len(), 1);
        assert!(!future.wait_timeout(Duration::from_millis(20)));
        assert_eq!(scheduler.clear(), 1);
        assert_eq!(future.wait(), Err(TaskError::Abandoned));
    }
}
