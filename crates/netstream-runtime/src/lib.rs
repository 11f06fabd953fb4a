#![doc = r#"
# netstream-runtime

## 设计动机（Why）
- 阻塞式套接字操作常被移出调用线程执行，调用方需要一个可伸缩的线程池、
  一个定时调度器，以及把结果交还给调用方的 future；
- 依赖其他任务结果的任务只在依赖就绪后才占用工作线程。

## 核心契约（What）
- [`TaskFuture`] / [`Promise`]：一次性结果通道，支持阻塞等待、带超时等待、
  就绪回调与 `std::future::Future`；
- [`ThreadPool`]：FIFO 任务队列，`set_nworkers` 异步伸缩，`submit_after` 登记延迟任务；
- [`Scheduler`]：按时间排序的任务队列，由单个后台线程服务；
- 未开始即被丢弃的任务，其 future 以 [`TaskError::Abandoned`] 结束。

## 实现策略（How）
- 共享状态统一由 `parking_lot::Mutex` + `Condvar` 保护；
- 延迟任务在依赖回调与池的清理路径之间由 [`TakeOnce`] 仲裁，
  该仲裁在 `cfg(loom)` 下以 loom 模型穷举验证。

## 风险与考量（Trade-offs）
- 已在执行中的任务无法取消；
- 调度器只有一个后台线程，长任务会推迟其后到期的条目。
"#]

mod error;
mod future;
mod pool;
mod scheduler;
mod sync;

pub use error::{RuntimeError, TaskError};
pub use future::{Promise, TaskFuture, channel};
pub use pool::ThreadPool;
pub use scheduler::Scheduler;
pub use sync::TakeOnce;
