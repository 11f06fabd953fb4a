//! 传输原语与套接字后端接口。
//!
//! [`Transport`] 只描述一次有界的读写尝试，缓冲核心 [`StreamBuf`](crate::StreamBuf)
//! 仅依赖它；[`SocketBackend`] 在此之上加入会话生命周期、TLS 控制与跨线程中断。
//! 每个具体后端（阻塞 BSD/WinSock 套接字、异步反应器驱动的套接字）各自实现一层，
//! 不存在更深的继承层次。

use crate::error::SockError;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// 字节传输原语。
///
/// # 契约说明（What）
/// - `read_some`：执行一次有界读取，成功时返回 `Ok(n)` 且 `n > 0`；
///   流结束以 [`SockErrc::Eof`](crate::SockErrc::Eof) 等价的错误表示，而非 `Ok(0)`；
/// - `write_some`：执行一次有界写入，返回实际接受的字节数；
/// - `flush`：把传输层自身暂存的数据（例如尚未发出的 TLS 记录）推送到对端；
/// - 返回 `Ok(0)` 一律被缓冲核心视为“当前无法推进”，不会在同一次公共调用中重试。
pub trait Transport {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, SockError>;

    fn write_some(&mut self, buf: &[u8]) -> Result<usize, SockError>;

    fn flush(&mut self) -> Result<(), SockError> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, SockError> {
        (**self).read_some(buf)
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize, SockError> {
        (**self).write_some(buf)
    }

    fn flush(&mut self) -> Result<(), SockError> {
        (**self).flush()
    }
}

/// 单条连接的生命周期状态。
///
/// ```text
/// Unopened ─connect→ Connecting ─ok→ Open ─start_ssl→ SslNegotiating ─ok→ SslActive
///                         └─err→ Errored        stop_ssl(graceful) ↩ Open
/// Open/SslActive ─shutdown→ ShuttingDown      任意状态 ─close/interrupt→ Closed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unopened,
    Connecting,
    Open,
    SslNegotiating,
    SslActive,
    /// 写方向已半关闭（或正在执行 TLS 关闭握手），读方向仍可排空对端数据。
    ShuttingDown,
    Closed,
    /// 发生了不可恢复的 IO 失败，后续操作立即失败，直到 `close()`。
    Errored,
}

impl SessionState {
    /// 套接字句柄仍被持有且可以读取。
    pub fn is_open(self) -> bool {
        matches!(
            self,
            SessionState::Open | SessionState::SslActive | SessionState::ShuttingDown
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unopened => "unopened",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::SslNegotiating => "ssl-negotiating",
            SessionState::SslActive => "ssl-active",
            SessionState::ShuttingDown => "shutting-down",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// `stop_ssl` 的两种成功结果；第三种结果（协议违规或超时）以 `Err` 返回，且套接字已关闭。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsShutdown {
    /// 对端回复了 `close_notify`，会话回到明文套接字，连接保持打开。
    Graceful,
    /// 对端直接关闭了传输层而没有回复 `close_notify`，连接已不再打开。
    TransportClosed,
}

/// 后端提供的跨线程中断能力。
pub trait Interrupt: Send + Sync {
    /// 促使正在阻塞的读写尽快返回错误。可以在任意线程、任意时刻调用。
    fn interrupt(&self);

    /// 是否有尚未被所属线程处理的中断请求。
    fn is_pending(&self) -> bool;
}

/// 可克隆、可跨线程传递的中断句柄。
#[derive(Clone)]
pub struct InterruptHandle {
    inner: Arc<dyn Interrupt>,
}

impl InterruptHandle {
    pub fn new(inner: Arc<dyn Interrupt>) -> Self {
        Self { inner }
    }

    pub fn interrupt(&self) {
        self.inner.interrupt();
    }

    pub fn is_pending(&self) -> bool {
        self.inner.is_pending()
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// 具体套接字后端需要实现的能力集合。
///
/// # 契约说明（What）
/// - 所有可失败操作都不 panic，返回 `Err` 的同时把错误记录为粘滞的 [`last_error`](Self::last_error)；
/// - `connect`：仅在后端不持有套接字句柄时执行，已打开时立即返回错误而不重连，也不改动状态；
/// - `shutdown`：只对底层套接字执行写方向半关闭，与 TLS 会话无关；
/// - `close`：拆除 TLS、执行系统 shutdown 并释放句柄，无论中途是否失败最终都处于 `Closed`；
/// - `start_ssl`/`stop_ssl`：在已打开的明文连接上开启/结束 TLS；握手或关闭交换一旦开始，失败即关闭套接字，
///   前置条件不满足（状态不符、参数无效）时只返回错误；
/// - `interrupt_handle`：返回可在其他线程调用的中断句柄。
///
/// 后端本身不缓冲应用数据，刷出缓冲区的责任在 [`StreamBuf`](crate::StreamBuf)。
pub trait SocketBackend: Transport {
    /// `start_ssl` 接受的 TLS 参数类型。
    type TlsParams;

    fn state(&self) -> SessionState;

    fn is_open(&self) -> bool {
        self.state().is_open()
    }

    fn connect(&mut self, host: &str, service: &str) -> Result<(), SockError>;

    fn shutdown(&mut self) -> Result<(), SockError>;

    fn close(&mut self) -> Result<(), SockError>;

    fn interrupt_handle(&self) -> InterruptHandle;

    fn interrupt(&self) {
        self.interrupt_handle().interrupt();
    }

    fn start_ssl(&mut self, params: Self::TlsParams) -> Result<(), SockError>;

    fn stop_ssl(&mut self) -> Result<TlsShutdown, SockError>;

    fn ssl_started(&self) -> bool;

    fn timeout(&self) -> Duration;

    /// 设置单次操作超时并返回旧值。
    fn set_timeout(&mut self, timeout: Duration) -> Duration;

    fn peer_endpoint(&self) -> Result<SocketAddr, SockError>;

    fn sock_endpoint(&self) -> Result<SocketAddr, SockError>;

    fn last_error(&self) -> Option<&SockError>;

    fn clear_last_error(&mut self);
}
