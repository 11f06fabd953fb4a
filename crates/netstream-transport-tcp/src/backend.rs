//! 阻塞式套接字后端。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 在 BSD 套接字与 WinSock2 之上提供同一套阻塞语义：单次读写受超时约束，
//!   超时只报告、不关闭；
//! - 允许其他线程在任意时刻调用 `interrupt()`，让阻塞中的读写迅速返回。
//!
//! ## 逻辑（How）
//! - 超时交给内核：每条连接设置 `SO_RCVTIMEO`/`SO_SNDTIMEO`，到期表现为
//!   `WouldBlock`/`TimedOut`，统一归入 `SockErrc::Timeout`；
//! - 建连使用 `socket2::Socket::connect_timeout`，多个解析地址共享一个截止时间；
//! - 中断：后端持有句柄的一个复制品，`interrupt()` 置位请求标志并对复制品执行
//!   `shutdown(Both)`，阻塞在同一套接字上的系统调用随即返回；所属线程在每次操作前后
//!   检查标志，释放句柄并进入 `Closed`。外部线程从不关闭句柄本身，描述符不会被复用。
//!
//! ## 契约（What）
//! - 除 [`interrupt`](netstream_core::InterruptHandle::interrupt) 外的所有方法只能由所属线程调用；
//! - 超时与流结束不改变会话状态，其余 IO 失败使会话进入 `Errored`，直到 `close()`。

use crate::config::TcpSocketConfig;
use crate::error::{
    CLOSE, CONFIGURE, CONNECT, ENDPOINT, OperationKind, READ, SHUTDOWN, START_SSL, STOP_SSL,
    WRITE, map_io_error,
};
use crate::resolve::resolve;
use netstream_core::time::{Clock, Deadline, system_clock};
use netstream_core::{
    Interrupt, InterruptHandle, SessionState, SockErrc, SockError, SocketBackend, SocketCode,
    TlsShutdown, Transport,
};
use netstream_tls::rustls::ProtocolVersion;
use netstream_tls::{ResolvedTls, TlsParams, TlsSession};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 内核超时的最小粒度；零时长会被系统调用视为非法参数。
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

fn apply_timeouts(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))
}

#[derive(Default)]
struct TcpInterrupter {
    requested: AtomicBool,
    handle: Mutex<Option<Socket>>,
}

impl TcpInterrupter {
    fn arm(&self, handle: Socket) {
        *self.handle.lock() = Some(handle);
    }

    fn disarm(&self) {
        self.handle.lock().take();
    }

    fn take_request(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }

    fn clear(&self) {
        self.requested.store(false, Ordering::Release);
    }
}

impl Interrupt for TcpInterrupter {
    fn interrupt(&self) {
        // 先置位再加锁：所属线程在登记句柄后检查标志，两者至少有一方能看到对方。
        self.requested.store(true, Ordering::Release);
        let guard = self.handle.lock();
        if let Some(handle) = guard.as_ref()
            && let Err(err) = handle.shutdown(Shutdown::Both)
            && err.kind() != io::ErrorKind::NotConnected
        {
            tracing::debug!(error = %err, "shutdown of interrupted socket failed");
        }
        tracing::debug!(armed = guard.is_some(), "tcp interrupt requested");
    }

    fn is_pending(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

fn read_plain(mut stream: &TcpStream, buf: &mut [u8]) -> Result<usize, SockError> {
    loop {
        match stream.read(buf) {
            Ok(0) => return Err(SockError::eof(READ.code)),
            Ok(n) => {
                tracing::trace!(bytes = n, "tcp read");
                return Ok(n);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(map_io_error(READ, &err)),
        }
    }
}

fn write_plain(mut stream: &TcpStream, buf: &[u8]) -> Result<usize, SockError> {
    loop {
        match stream.write(buf) {
            Ok(n) => {
                tracing::trace!(bytes = n, "tcp write");
                return Ok(n);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(map_io_error(WRITE, &err)),
        }
    }
}

/// 基于 BSD 套接字 / WinSock2 的阻塞后端。
///
/// # 契约说明（What）
/// - `connect`：依次尝试解析出的地址，全部尝试共享一个超时预算；
/// - `start_ssl`：默认以客户端身份握手，SNI 取 `TlsParams::server_name` 或建连主机名；
///   传入服务端上下文时执行服务端握手；
/// - `stop_ssl`：三种结局见 [`TlsShutdown`]，失败时套接字已关闭；
/// - [`from_std`](Self::from_std)：接管调用方已连接好的套接字（例如 `accept` 的结果）。
pub struct TcpBackend {
    stream: Option<TcpStream>,
    tls: Option<TlsSession>,
    state: SessionState,
    timeout: Duration,
    config: TcpSocketConfig,
    host: Option<String>,
    last_error: Option<SockError>,
    interrupter: Arc<TcpInterrupter>,
    clock: Arc<dyn Clock>,
}

impl TcpBackend {
    pub fn new() -> Self {
        Self::with_config(TcpSocketConfig::default())
    }

    pub fn with_config(config: TcpSocketConfig) -> Self {
        Self {
            stream: None,
            tls: None,
            state: SessionState::Unopened,
            timeout: config.stream.timeout().max(MIN_TIMEOUT),
            config,
            host: None,
            last_error: None,
            interrupter: Arc::default(),
            clock: system_clock(),
        }
    }

    /// 替换计算多步操作截止时间所用的时钟。
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 接管一条已连接的套接字，会话直接处于 `Open`。
    pub fn from_std(stream: TcpStream) -> Result<Self, SockError> {
        Self::from_std_with_config(stream, TcpSocketConfig::default())
    }

    pub fn from_std_with_config(stream: TcpStream, config: TcpSocketConfig) -> Result<Self, SockError> {
        let mut backend = Self::with_config(config);
        backend.install(stream)?;
        tracing::debug!(peer = ?backend.peer_endpoint().ok(), "adopted connected tcp socket");
        Ok(backend)
    }

    pub fn config(&self) -> &TcpSocketConfig {
        &self.config
    }

    /// 底层套接字；仅用于查询选项，直接读写会绕过 TLS 与缓冲。
    pub fn socket(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    /// 已协商的 TLS 版本。
    pub fn tls_version(&self) -> Option<ProtocolVersion> {
        self.tls.as_ref().and_then(TlsSession::protocol_version)
    }

    /// 已协商的 ALPN 协议。
    pub fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.tls
            .as_ref()
            .and_then(|session| session.alpn_protocol().map(<[u8]>::to_vec))
    }

    fn install(&mut self, stream: TcpStream) -> Result<(), SockError> {
        self.config
            .apply(&stream)
            .map_err(|err| map_io_error(CONFIGURE, &err))?;
        apply_timeouts(&stream, self.timeout).map_err(|err| map_io_error(CONFIGURE, &err))?;
        let handle = stream
            .try_clone()
            .map_err(|err| map_io_error(CONFIGURE, &err))?;
        self.interrupter.arm(Socket::from(handle));
        self.stream = Some(stream);
        self.tls = None;
        self.state = SessionState::Open;
        self.last_error = None;
        Ok(())
    }

    /// 释放句柄及其复制品，不执行系统 shutdown。
    fn release(&mut self) {
        self.interrupter.disarm();
        self.tls = None;
        self.stream = None;
    }

    fn record(&mut self, err: SockError) -> SockError {
        self.last_error = Some(err.clone());
        err
    }

    fn observe_interrupt(&mut self, kind: OperationKind) -> Result<(), SockError> {
        if self.interrupter.take_request() {
            tracing::debug!(op = kind.code, state = %self.state, "interrupt observed, releasing socket");
            self.release();
            self.state = SessionState::Closed;
            return Err(self.record(SockError::interrupted(kind.code)));
        }
        Ok(())
    }

    fn require(&mut self, kind: OperationKind, writable: bool) -> Result<(), SockError> {
        let usable = match self.state {
            SessionState::Open | SessionState::SslActive => true,
            SessionState::ShuttingDown => !writable,
            _ => false,
        };
        if usable && self.stream.is_some() {
            Ok(())
        } else {
            Err(self.record(SockError::not_open(kind.code)))
        }
    }

    /// 操作结束后的统一收尾：先处理中断，再按错误条件决定是否进入 `Errored`。
    fn settle<T>(&mut self, kind: OperationKind, result: Result<T, SockError>) -> Result<T, SockError> {
        self.observe_interrupt(kind)?;
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                match SockErrc::classify(Some(&err)) {
                    SockErrc::Eof => tracing::trace!(op = kind.code, "end of stream"),
                    SockErrc::Timeout => tracing::debug!(op = kind.code, "operation timed out"),
                    _ => {
                        tracing::warn!(op = kind.code, code = err.code(), error = %err, "socket entered errored state");
                        self.state = SessionState::Errored;
                    }
                }
                Err(self.record(err))
            }
        }
    }

    fn connect_any(&self, addrs: &[SocketAddr], deadline: &Deadline) -> Result<TcpStream, SockError> {
        let mut last_error = None;
        for addr in addrs {
            let Some(budget) = deadline.remaining() else {
                break;
            };
            match self.connect_one(*addr, budget) {
                Ok(stream) => return Ok(stream),
                Err(err) if err.is_socket(SocketCode::Interrupted) => return Err(err),
                Err(err) => {
                    tracing::debug!(%addr, error = %err, "connect attempt failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SockError::timeout(CONNECT.code)))
    }

    fn connect_one(&self, addr: SocketAddr, budget: Duration) -> Result<TcpStream, SockError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|err| map_io_error(CONNECT, &err))?;
        let handle = socket
            .try_clone()
            .map_err(|err| map_io_error(CONNECT, &err))?;
        self.interrupter.arm(handle);
        if self.interrupter.take_request() {
            self.interrupter.disarm();
            return Err(SockError::interrupted(CONNECT.code));
        }
        let outcome = socket.connect_timeout(&addr.into(), budget.max(MIN_TIMEOUT));
        if self.interrupter.take_request() {
            self.interrupter.disarm();
            return Err(SockError::interrupted(CONNECT.code));
        }
        if let Err(err) = outcome {
            self.interrupter.disarm();
            return Err(map_io_error(CONNECT, &err));
        }
        Ok(TcpStream::from(socket))
    }
}

impl Default for TcpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TcpBackend {
    fn drop(&mut self) {
        // 中断句柄可能比后端活得更久，复制品必须随后端一起释放，否则连接不会真正关闭。
        self.interrupter.disarm();
    }
}

impl fmt::Debug for TcpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpBackend")
            .field("state", &self.state)
            .field("peer", &self.peer_endpoint().ok())
            .field("tls", &self.tls)
            .field("timeout", &self.timeout)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl Transport for TcpBackend {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, SockError> {
        self.observe_interrupt(READ)?;
        self.require(READ, false)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = match (self.tls.as_mut(), self.stream.as_ref()) {
            (Some(session), Some(stream)) => {
                let mut io = stream;
                session.read(&mut io, buf)
            }
            (None, Some(stream)) => read_plain(stream, buf),
            (_, None) => Err(SockError::not_open(READ.code)),
        };
        self.settle(READ, result)
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize, SockError> {
        self.observe_interrupt(WRITE)?;
        self.require(WRITE, true)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = match (self.tls.as_mut(), self.stream.as_ref()) {
            (Some(session), Some(stream)) => {
                let mut io = stream;
                session.write(&mut io, buf)
            }
            (None, Some(stream)) => write_plain(stream, buf),
            (_, None) => Err(SockError::not_open(WRITE.code)),
        };
        self.settle(WRITE, result)
    }

    /// 推送 TLS 会话中积压的记录；明文连接没有需要推送的内容。
    fn flush(&mut self) -> Result<(), SockError> {
        self.observe_interrupt(WRITE)?;
        let result = match (self.tls.as_mut(), self.stream.as_ref()) {
            (Some(session), Some(stream)) => {
                let mut io = stream;
                session.flush(&mut io)
            }
            _ => Ok(()),
        };
        self.settle(WRITE, result)
    }
}

impl SocketBackend for TcpBackend {
    type TlsParams = TlsParams;

    fn state(&self) -> SessionState {
        self.state
    }

    fn connect(&mut self, host: &str, service: &str) -> Result<(), SockError> {
        if self.stream.is_some() {
            tracing::debug!(state = %self.state, "connect ignored, socket already open");
            return Err(SockError::socket(CONNECT.code, SocketCode::AlreadyOpen));
        }
        self.interrupter.clear();
        self.tls = None;
        self.state = SessionState::Connecting;
        self.last_error = None;
        self.host = Some(host.to_owned());

        let deadline = Deadline::after(self.clock.clone(), self.timeout);
        let result = resolve(host, service).and_then(|addrs| self.connect_any(&addrs, &deadline));
        let installed = result.and_then(|stream| self.install(stream));
        match installed {
            Ok(()) => {
                tracing::debug!(host, service, peer = ?self.peer_endpoint().ok(), "tcp connected");
                Ok(())
            }
            Err(err) => {
                self.release();
                self.state = if err.is_socket(SocketCode::Interrupted) {
                    SessionState::Closed
                } else {
                    SessionState::Errored
                };
                tracing::debug!(host, service, error = %err, "tcp connect failed");
                Err(self.record(err))
            }
        }
    }

    fn shutdown(&mut self) -> Result<(), SockError> {
        self.observe_interrupt(SHUTDOWN)?;
        self.require(SHUTDOWN, true)?;
        Transport::flush(self)?;
        let result = match self.stream.as_ref() {
            Some(stream) => stream
                .shutdown(Shutdown::Write)
                .map_err(|err| map_io_error(SHUTDOWN, &err)),
            None => Err(SockError::not_open(SHUTDOWN.code)),
        };
        self.settle(SHUTDOWN, result)?;
        self.state = SessionState::ShuttingDown;
        tracing::debug!("tcp write side shut down");
        Ok(())
    }

    fn close(&mut self) -> Result<(), SockError> {
        if let (Some(session), Some(stream)) = (self.tls.as_mut(), self.stream.as_ref()) {
            let mut io = stream;
            if let Err(err) = session.notify_close(&mut io) {
                tracing::debug!(error = %err, "close_notify not delivered during close");
            }
        }
        self.interrupter.disarm();
        self.tls = None;
        let mut failure = None;
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.shutdown(Shutdown::Both)
                && err.kind() != io::ErrorKind::NotConnected
            {
                failure = Some(map_io_error(CLOSE, &err));
            }
            tracing::debug!(previous = %self.state, "tcp socket closed");
        }
        self.interrupter.clear();
        self.state = SessionState::Closed;
        match failure {
            Some(err) => Err(self.record(err)),
            None => Ok(()),
        }
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle::new(self.interrupter.clone())
    }

    fn start_ssl(&mut self, params: TlsParams) -> Result<(), SockError> {
        self.observe_interrupt(START_SSL)?;
        if self.tls.is_some() {
            return Err(self.record(SockError::socket(START_SSL.code, SocketCode::TlsAlreadyActive)));
        }
        if self.state != SessionState::Open {
            return Err(self.record(SockError::not_open(START_SSL.code)));
        }
        let conn = match params
            .resolve(self.host.as_deref())
            .and_then(ResolvedTls::into_connection)
        {
            Ok(conn) => conn,
            Err(err) => return Err(self.record(err)),
        };

        self.state = SessionState::SslNegotiating;
        let mut session = TlsSession::new(conn);
        let deadline = Deadline::after(self.clock.clone(), self.timeout);
        let result = match self.stream.as_ref() {
            Some(stream) => {
                let mut io = stream;
                let outcome = session.handshake(&mut io, &deadline);
                if let Err(err) = apply_timeouts(stream, self.timeout) {
                    tracing::warn!(error = %err, "restoring socket timeouts after handshake failed");
                }
                outcome
            }
            None => Err(SockError::not_open(START_SSL.code)),
        };
        self.observe_interrupt(START_SSL)?;
        match result {
            Ok(()) => {
                tracing::debug!(
                    server = session.is_server(),
                    version = ?session.protocol_version(),
                    alpn = ?session.alpn_protocol().map(String::from_utf8_lossy),
                    "tls session established"
                );
                self.tls = Some(session);
                self.state = SessionState::SslActive;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "tls handshake failed, closing socket");
                self.release();
                self.state = SessionState::Closed;
                Err(self.record(err))
            }
        }
    }

    fn stop_ssl(&mut self) -> Result<TlsShutdown, SockError> {
        self.observe_interrupt(STOP_SSL)?;
        let Some(mut session) = self.tls.take() else {
            return Err(self.record(SockError::socket(STOP_SSL.code, SocketCode::TlsNotActive)));
        };
        let resume = if self.state == SessionState::ShuttingDown {
            SessionState::ShuttingDown
        } else {
            SessionState::Open
        };
        let deadline = Deadline::after(self.clock.clone(), self.timeout);
        let result = match self.stream.as_ref() {
            Some(stream) => {
                let mut io = stream;
                let outcome = session.shutdown(&mut io, &deadline);
                if let Err(err) = apply_timeouts(stream, self.timeout) {
                    tracing::debug!(error = %err, "restoring socket timeouts after tls shutdown failed");
                }
                outcome
            }
            None => Err(SockError::not_open(STOP_SSL.code)),
        };
        drop(session);
        self.observe_interrupt(STOP_SSL)?;
        match result {
            Ok(TlsShutdown::Graceful) => {
                self.state = resume;
                tracing::debug!("tls session closed, connection continues in plain text");
                Ok(TlsShutdown::Graceful)
            }
            Ok(TlsShutdown::TransportClosed) => {
                self.release();
                self.state = SessionState::Closed;
                tracing::debug!("peer closed the transport during tls shutdown");
                Ok(TlsShutdown::TransportClosed)
            }
            Err(err) => {
                tracing::warn!(error = %err, "tls shutdown failed, closing socket");
                self.release();
                self.state = SessionState::Closed;
                Err(self.record(err))
            }
        }
    }

    fn ssl_started(&self) -> bool {
        self.tls.is_some()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Duration {
        let timeout = timeout.max(MIN_TIMEOUT);
        let previous = std::mem::replace(&mut self.timeout, timeout);
        if let Some(stream) = self.stream.as_ref()
            && let Err(err) = apply_timeouts(stream, timeout)
        {
            tracing::warn!(error = %err, "applying socket timeouts failed");
        }
        previous
    }

    fn peer_endpoint(&self) -> Result<SocketAddr, SockError> {
        match self.stream.as_ref() {
            Some(stream) => stream.peer_addr().map_err(|err| map_io_error(ENDPOINT, &err)),
            None => Err(SockError::not_open(ENDPOINT.code)),
        }
    }

    fn sock_endpoint(&self) -> Result<SocketAddr, SockError> {
        match self.stream.as_ref() {
            Some(stream) => stream.local_addr().map_err(|err| map_io_error(ENDPOINT, &err)),
            None => Err(SockError::not_open(ENDPOINT.code)),
        }
    }

    fn last_error(&self) -> Option<&SockError> {
        self.last_error.as_ref()
    }

    fn clear_last_error(&mut self) {
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn refused_connect_is_logged_and_errored() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut backend = TcpBackend::new();
        let err = backend.connect("127.0.0.1", &port.to_string()).unwrap_err();
        assert_eq!(backend.state(), SessionState::Errored);
        assert!(err == SockErrc::Error);
        assert_eq!(backend.last_error(), Some(&err));
        assert!(logs_contain("tcp connect failed"));

        // 建连失败后不持有句柄，允许直接重试。
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        backend.connect("127.0.0.1", &port.to_string()).unwrap();
        assert_eq!(backend.state(), SessionState::Open);
        assert!(backend.last_error().is_none());
    }

    #[test]
    fn connect_while_open_is_refused_without_side_effects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let mut backend = TcpBackend::new();
        backend.connect("127.0.0.1", &port).unwrap();
        let peer = backend.peer_endpoint().unwrap();

        let err = backend.connect("127.0.0.1", &port).unwrap_err();
        assert!(err.is_socket(SocketCode::AlreadyOpen));
        assert_eq!(backend.state(), SessionState::Open);
        assert_eq!(backend.peer_endpoint().unwrap(), peer);
        assert!(backend.last_error().is_none());
    }

    #[test]
    fn stale_interrupt_does_not_poison_the_next_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let mut backend = TcpBackend::new();
        backend.interrupt();
        backend.connect("127.0.0.1", &port).unwrap();
        assert!(backend.is_open());
    }

    #[test]
    fn timeout_is_clamped_to_one_millisecond() {
        let mut backend = TcpBackend::new();
        assert_eq!(backend.timeout(), netstream_core::DEFAULT_TIMEOUT);
        backend.set_timeout(Duration::ZERO);
        assert_eq!(backend.timeout(), MIN_TIMEOUT);
    }

    #[test]
    fn operations_on_an_unopened_backend_fail_fast() {
        let mut backend = TcpBackend::new();
        let mut buf = [0u8; 4];
        assert!(backend.read_some(&mut buf).unwrap_err().is_socket(SocketCode::NotOpen));
        assert!(backend.peer_endpoint().is_err());
        assert!(backend.stop_ssl().unwrap_err().is_socket(SocketCode::TlsNotActive));
        assert_eq!(backend.state(), SessionState::Unopened);
        assert!(backend.close().is_ok());
        assert_eq!(backend.state(), SessionState::Closed);
    }
}
