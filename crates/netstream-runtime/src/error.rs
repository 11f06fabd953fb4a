use std::io;
use thiserror::Error;

/// 任务 future 的失败结局。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TaskError {
    /// 任务在执行前被丢弃：`clear()`、池或调度器析构，或 promise 未兑现即被丢弃。
    #[error("task was abandoned before it ran")]
    Abandoned,
    /// 任务执行时 panic，携带 panic 消息。
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// 线程池与调度器的构造/伸缩错误。
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}
