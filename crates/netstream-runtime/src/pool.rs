//! 可伸缩线程池。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 把套接字操作移出调用线程时需要一个能在运行期调整并发度的执行器；
//! - 依赖另一个任务结果的任务不应占用工作线程空等。
//!
//! ## 逻辑（How）
//! - FIFO 任务队列、工作线程计数与伸缩等待者位于同一把 `parking_lot::Mutex` 下，
//!   `Condvar` 同时用于“有新任务”与“目标线程数变化”两种唤醒；
//! - 工作线程在每次取任务前比较存活数与目标数，多出的线程自行退出；
//! - 延迟任务登记在旁路表中，由依赖的就绪回调入队。回调只持有池的 `Weak`，
//!   任务本身由 [`TakeOnce`] 包装，回调与 `clear`/析构之间恰好一方取得任务。
//!
//! ## 契约（What）
//! - 未开始的任务被丢弃时，其 future 记为 [`TaskError::Abandoned`](crate::TaskError::Abandoned)；
//! - 已经交给工作线程的任务不可取消；
//! - 依赖无论以何种结局就绪，延迟任务都会入队。

use crate::error::RuntimeError;
use crate::future::{self, Promise, TaskFuture};
use crate::sync::TakeOnce;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct DelayedJob {
    id: u64,
    job: TakeOnce<Job>,
}

struct PoolState {
    tasks: VecDeque<Job>,
    delayed: HashMap<u64, Arc<DelayedJob>>,
    next_delayed: u64,
    target: usize,
    running: usize,
    next_worker: usize,
    shrink_waiters: Vec<(usize, Promise<()>)>,
    handles: Vec<JoinHandle<()>>,
    shutdown: bool,
}

impl PoolState {
    fn satisfied_waiters(&mut self) -> Vec<Promise<()>> {
        let running = self.running;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.shrink_waiters)
            .into_iter()
            .partition(|(target, _)| running <= *target);
        self.shrink_waiters = waiting;
        ready.into_iter().map(|(_, promise)| promise).collect()
    }
}

struct Inner {
    state: Mutex<PoolState>,
    available: Condvar,
}

impl Inner {
    /// 入队一个任务；池已关闭时任务被丢弃，其 future 记为放弃。
    fn push(&self, job: Job) {
        let mut state = self.state.lock();
        if state.shutdown {
            drop(state);
            drop(job);
            return;
        }
        state.tasks.push_back(job);
        drop(state);
        self.available.notify_one();
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState) -> Result<(), RuntimeError> {
        let id = state.next_worker;
        let inner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("netstream-pool-{id}"))
            .spawn(move || inner.work(id))?;
        state.next_worker += 1;
        state.running += 1;
        state.handles.push(handle);
        Ok(())
    }

    fn work(&self, id: usize) {
        tracing::trace!(worker = id, "pool worker started");
        loop {
            let job = {
                let mut state = self.state.lock();
                loop {
                    if state.shutdown || state.running > state.target {
                        state.running -= 1;
                        let waiters = state.satisfied_waiters();
                        drop(state);
                        for waiter in waiters {
                            waiter.set_value(());
                        }
                        tracing::trace!(worker = id, "pool worker stopped");
                        return;
                    }
                    if let Some(job) = state.tasks.pop_front() {
                        break job;
                    }
                    self.available.wait(&mut state);
                }
            };
            job();
        }
    }
}

/// 线程数可在运行期调整的 FIFO 线程池。
pub struct ThreadPool {
    inner: Arc<Inner>,
}

impl ThreadPool {
    /// 启动 `nworkers` 个工作线程。
    pub fn new(nworkers: usize) -> Result<Self, RuntimeError> {
        let inner = Arc::new(Inner {
            state: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                delayed: HashMap::new(),
                next_delayed: 0,
                target: nworkers,
                running: 0,
                next_worker: 0,
                shrink_waiters: Vec::new(),
                handles: Vec::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });
        let pool = Self { inner };
        {
            let mut state = pool.inner.state.lock();
            for _ in 0..nworkers {
                pool.inner.spawn_worker(&mut state)?;
            }
        }
        tracing::debug!(nworkers, "thread pool started");
        Ok(pool)
    }

    /// 提交任务，返回其结果的 future。
    pub fn submit<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (promise, future) = future::channel();
        self.inner.push(Box::new(move || promise.run(f)));
        future
    }

    /// 待 `dependency` 就绪后再入队 `f`。
    pub fn submit_after<D, F, T>(&self, dependency: &TaskFuture<D>, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (promise, future) = future::channel();
        let job: Job = Box::new(move || promise.run(f));
        if dependency.is_ready() {
            self.inner.push(job);
            return future;
        }

        let delayed = {
            let mut state = self.inner.state.lock();
            let id = state.next_delayed;
            state.next_delayed += 1;
            let delayed = Arc::new(DelayedJob {
                id,
                job: TakeOnce::new(job),
            });
            state.delayed.insert(id, Arc::clone(&delayed));
            delayed
        };

        let pool: Weak<Inner> = Arc::downgrade(&self.inner);
        dependency.on_ready(move || {
            // 取不到说明 clear 或析构已经处理了这个任务。
            let Some(job) = delayed.job.take() else {
                return;
            };
            match pool.upgrade() {
                Some(inner) => {
                    inner.state.lock().delayed.remove(&delayed.id);
                    inner.push(job);
                }
                None => drop(job),
            }
        });
        future
    }

    /// 调整工作线程数。
    ///
    /// 扩容时新线程启动后立即就绪；缩容时在多余线程全部退出后就绪。
    /// 被后续调整取代的缩容等待记为 [`TaskError::Abandoned`](crate::TaskError::Abandoned)。
    pub fn set_nworkers(&self, nworkers: usize) -> Result<TaskFuture<()>, RuntimeError> {
        let (promise, future) = future::channel();
        // 先于锁声明：被取代的等待者在锁释放之后才被丢弃，其回调不会在锁内运行。
        let superseded;
        let immediate = {
            let mut state = self.inner.state.lock();
            superseded = std::mem::take(&mut state.shrink_waiters);
            state.target = nworkers;
            state.handles.retain(|handle| !handle.is_finished());
            while state.running < nworkers {
                self.inner.spawn_worker(&mut state)?;
            }
            if state.running > nworkers {
                state.shrink_waiters.push((nworkers, promise));
                None
            } else {
                Some(promise)
            }
        };
        drop(superseded);
        match immediate {
            Some(promise) => promise.set_value(()),
            None => {
                self.inner.available.notify_all();
            }
        }
        tracing::debug!(nworkers, "thread pool resized");
        Ok(future)
    }

    /// 当前存活的工作线程数。
    pub fn nworkers(&self) -> usize {
        self.inner.state.lock().running
    }

    /// 尚未开始的任务数，包括等待依赖的延迟任务。
    pub fn pending(&self) -> usize {
        let state = self.inner.state.lock();
        state.tasks.len() + state.delayed.len()
    }

    /// 丢弃所有未开始的任务，返回丢弃的数量。
    pub fn clear(&self) -> usize {
        let (tasks, delayed) = {
            let mut state = self.inner.state.lock();
            (
                std::mem::take(&mut state.tasks),
                std::mem::take(&mut state.delayed),
            )
        };
        let mut discarded = tasks.len();
        drop(tasks);
        for (_, entry) in delayed {
            if let Some(job) = entry.job.take() {
                discarded += 1;
                drop(job);
            }
        }
        tracing::debug!(discarded, "thread pool cleared");
        discarded
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let (tasks, delayed, handles) = {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            (
                std::mem::take(&mut state.tasks),
                std::mem::take(&mut state.delayed),
                std::mem::take(&mut state.handles),
            )
        };
        drop(tasks);
        for (_, entry) in delayed {
            drop(entry.job.take());
        }
        self.inner.available.notify_all();

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current && handle.join().is_err() {
                tracing::warn!("pool worker exited by panic");
            }
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ThreadPool")
            .field("running", &state.running)
            .field("target", &state.target)
            .field("queued", &state.tasks.len())
            .field("delayed", &state.delayed.len())
            .finish()
    }
}
