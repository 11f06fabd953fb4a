//! 由 Tokio 反应器驱动的后端。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 与阻塞后端提供同一套 [`SocketBackend`] 语义，但 IO 由反应器和 `tokio-rustls` 完成，
//!   适合已经依赖 Tokio 的进程复用其运行时；
//! - 中断不依赖关闭句柄：请求通过 `Notify` 唤醒正在 `block_on` 的操作。
//!
//! ## 逻辑（How）
//! - 每个操作在 `Runtime::block_on` 中执行，`select!` 同时等待中断、超时与 IO 本身；
//! - 中断或超时到达时 IO future 被丢弃，Tokio 与 `tokio-rustls` 的读写对取消是安全的；
//! - TLS 关闭交换不使用 `AsyncWriteExt::shutdown`（它会连带关闭写方向），而是只发送
//!   `close_notify` 并读取到对端的回复，成功后取回明文 `TcpStream` 继续使用；
//! - TLS 阶段的 `TcpStream` 套在 [`RecordStream`] 中，密文读取不越过记录边界，
//!   对端在 `close_notify` 之后紧接着发送的明文不会被 `rustls` 提前读走。
//!
//! ## 契约（What）
//! - 不能在异步上下文中调用任何阻塞方法：此时操作不进入 `block_on`，而是返回
//!   `ErrorKind::Unsupported` 的错误；
//! - 中断请求在下一次检查点被所属线程观察到，随后释放连接并进入 `Closed`。

use crate::error::{
    CLOSE, CONFIGURE, CONNECT, ENDPOINT, OperationKind, READ, RUNTIME, SHUTDOWN, START_SSL,
    STOP_SSL, WRITE, map_io_error,
};
use crate::framed::RecordStream;
use netstream_core::time::{Deadline, system_clock};
use netstream_core::{
    ErrorDomain, Interrupt, InterruptHandle, SessionState, SockErrc, SockError, SocketBackend, SocketCode,
    TlsCode, TlsShutdown, Transport,
};
use netstream_tls::error as tls_error;
use netstream_tls::rustls::ProtocolVersion;
use netstream_tls::{ResolvedTls, TlsParams};
use netstream_transport_tcp::{TcpSocketConfig, resolve};
use socket2::SockRef;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Notify;
use tokio_rustls::{TlsAcceptor, TlsConnector, client, server};

const MIN_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Default)]
struct TokioInterrupter {
    requested: AtomicBool,
    notify: Notify,
}

impl TokioInterrupter {
    /// 直到出现中断请求才完成；残留的通知许可只会触发一次重新检查。
    async fn requested(&self) {
        loop {
            if self.requested.load(Ordering::Acquire) {
                return;
            }
            self.notify.notified().await;
        }
    }

    fn take_request(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }

    fn clear(&self) {
        self.requested.store(false, Ordering::Release);
    }
}

impl Interrupt for TokioInterrupter {
    fn interrupt(&self) {
        self.requested.store(true, Ordering::Release);
        self.notify.notify_one();
        tracing::debug!("tokio interrupt requested");
    }

    fn is_pending(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

struct Driver {
    runtime: Arc<Runtime>,
    interrupter: Arc<TokioInterrupter>,
}

impl Driver {
    /// 在运行时上执行 `future`，外层错误是超时、中断或调用方身处异步上下文。
    fn run<F: Future>(&self, budget: Duration, op: &'static str, future: F) -> Result<F::Output, SockError> {
        if Handle::try_current().is_ok() {
            tracing::warn!(op, "blocking socket operation called from inside a tokio runtime");
            return Err(inside_runtime(op));
        }
        let interrupter = &self.interrupter;
        self.runtime.block_on(async {
            tokio::select! {
                biased;
                () = interrupter.requested() => Err(SockError::interrupted(op)),
                outcome = tokio::time::timeout(budget.max(MIN_TIMEOUT), future) => {
                    outcome.map_err(|_| SockError::timeout(op))
                }
            }
        })
    }
}

/// 异步上下文中无法 `block_on`；报告为不可重试的 IO 错误。
fn inside_runtime(op: &'static str) -> SockError {
    SockError::new(
        ErrorDomain::Socket,
        SocketCode::Io as i32,
        io::ErrorKind::Unsupported,
        op,
        "blocking socket operation called from inside a tokio runtime; use spawn_blocking",
    )
}

/// `tokio-rustls` 客户端与服务端流的共同操作。
trait TlsTransport: AsyncRead + AsyncWrite + Unpin {
    fn send_close_notify(&mut self);
    fn peer_has_closed(&mut self) -> bool;
    fn into_tcp(self) -> TcpStream;
}

impl TlsTransport for client::TlsStream<RecordStream> {
    fn send_close_notify(&mut self) {
        self.get_mut().1.send_close_notify();
    }

    fn peer_has_closed(&mut self) -> bool {
        self.get_mut()
            .1
            .process_new_packets()
            .is_ok_and(|state| state.peer_has_closed())
    }

    fn into_tcp(self) -> TcpStream {
        self.into_inner().0.into_inner()
    }
}

impl TlsTransport for server::TlsStream<RecordStream> {
    fn send_close_notify(&mut self) {
        self.get_mut().1.send_close_notify();
    }

    fn peer_has_closed(&mut self) -> bool {
        self.get_mut()
            .1
            .process_new_packets()
            .is_ok_and(|state| state.peer_has_closed())
    }

    fn into_tcp(self) -> TcpStream {
        self.into_inner().0.into_inner()
    }
}

enum Conn {
    Plain(TcpStream),
    Client(Box<client::TlsStream<RecordStream>>),
    Server(Box<server::TlsStream<RecordStream>>),
}

impl Conn {
    fn tcp(&self) -> &TcpStream {
        match self {
            Conn::Plain(stream) => stream,
            Conn::Client(stream) => stream.get_ref().0.get_ref(),
            Conn::Server(stream) => stream.get_ref().0.get_ref(),
        }
    }

    fn is_tls(&self) -> bool {
        !matches!(self, Conn::Plain(_))
    }

    fn protocol_version(&self) -> Option<ProtocolVersion> {
        match self {
            Conn::Plain(_) => None,
            Conn::Client(stream) => stream.get_ref().1.protocol_version(),
            Conn::Server(stream) => stream.get_ref().1.protocol_version(),
        }
    }

    fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            Conn::Plain(_) => None,
            Conn::Client(stream) => stream.get_ref().1.alpn_protocol(),
            Conn::Server(stream) => stream.get_ref().1.alpn_protocol(),
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Conn::Plain(stream) => stream.read(buf).await,
            Conn::Client(stream) => stream.read(buf).await,
            Conn::Server(stream) => stream.read(buf).await,
        }
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Conn::Plain(stream) => stream.write(buf).await,
            Conn::Client(stream) => stream.write(buf).await,
            Conn::Server(stream) => stream.write(buf).await,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            Conn::Plain(_) => Ok(()),
            Conn::Client(stream) => stream.flush().await,
            Conn::Server(stream) => stream.flush().await,
        }
    }

    async fn notify_close(&mut self) -> io::Result<()> {
        match self {
            Conn::Plain(_) => Ok(()),
            Conn::Client(stream) => {
                stream.send_close_notify();
                stream.flush().await
            }
            Conn::Server(stream) => {
                stream.send_close_notify();
                stream.flush().await
            }
        }
    }
}

fn peer_gone(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::WriteZero
    )
}

/// 发送已排队的 `close_notify` 并读取到对端回复；交换期间的应用数据被丢弃。
async fn close_exchange<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> io::Result<TlsShutdown> {
    match stream.flush().await {
        Ok(()) => {}
        Err(err) if peer_gone(&err) => return Ok(TlsShutdown::TransportClosed),
        Err(err) => return Err(err),
    }
    let mut scratch = [0u8; 2048];
    loop {
        match stream.read(&mut scratch).await {
            Ok(0) => return Ok(TlsShutdown::Graceful),
            Ok(discarded) => {
                tracing::trace!(discarded, "discarding application data during tls shutdown");
            }
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof || peer_gone(&err) => {
                return Ok(TlsShutdown::TransportClosed);
            }
            Err(err) => return Err(err),
        }
    }
}

/// 结束一条 TLS 流：`Some` 为优雅结束后取回的明文连接，`None` 表示对端已关闭传输层。
fn stop_tls<S: TlsTransport>(driver: &Driver, budget: Duration, mut stream: Box<S>) -> Result<Option<TcpStream>, SockError> {
    stream.send_close_notify();
    let outcome = driver
        .run(budget, tls_error::SHUTDOWN.code, close_exchange(&mut *stream))?
        .map_err(|err| tls_error::io_error(tls_error::SHUTDOWN, &err))?;
    // 读到 0 字节还需确认确实收到了 close_notify，而不是传输层直接结束。
    if outcome == TlsShutdown::Graceful && stream.peer_has_closed() {
        let stream = *stream;
        Ok(Some(stream.into_tcp()))
    } else {
        Ok(None)
    }
}

/// 由 Tokio 运行时驱动、对外保持阻塞语义的套接字后端。
///
/// 默认持有一个私有的单线程运行时；[`with_runtime`](Self::with_runtime) 可以共享调用方的运行时。
///
/// 所有操作都以 `block_on` 驱动，只能在运行时之外的线程上调用；在异步任务内部调用时
/// 操作直接失败（`ErrorKind::Unsupported`），应改用 `tokio::task::spawn_blocking`。
/// 套接字选项与名称解析复用 `netstream-transport-tcp` 的 [`TcpSocketConfig`] 与 [`resolve`]。
pub struct TokioBackend {
    conn: Option<Conn>,
    state: SessionState,
    timeout: Duration,
    config: TcpSocketConfig,
    host: Option<String>,
    last_error: Option<SockError>,
    driver: Driver,
}

impl TokioBackend {
    pub fn new() -> Result<Self, SockError> {
        Self::with_config(TcpSocketConfig::default())
    }

    /// 创建私有的单线程运行时。
    pub fn with_config(config: TcpSocketConfig) -> Result<Self, SockError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| map_io_error(RUNTIME, &err))?;
        Ok(Self::with_runtime(Arc::new(runtime), config))
    }

    pub fn with_runtime(runtime: Arc<Runtime>, config: TcpSocketConfig) -> Self {
        Self {
            conn: None,
            state: SessionState::Unopened,
            timeout: config.stream.timeout().max(MIN_TIMEOUT),
            config,
            host: None,
            last_error: None,
            driver: Driver {
                runtime,
                interrupter: Arc::default(),
            },
        }
    }

    /// 接管一条已连接的标准库套接字，会话直接处于 `Open`。
    pub fn from_std(stream: std::net::TcpStream) -> Result<Self, SockError> {
        let mut backend = Self::new()?;
        backend.adopt(stream)?;
        Ok(backend)
    }

    pub fn from_std_with_runtime(
        stream: std::net::TcpStream,
        runtime: Arc<Runtime>,
        config: TcpSocketConfig,
    ) -> Result<Self, SockError> {
        let mut backend = Self::with_runtime(runtime, config);
        backend.adopt(stream)?;
        Ok(backend)
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.driver.runtime
    }

    pub fn config(&self) -> &TcpSocketConfig {
        &self.config
    }

    pub fn tls_version(&self) -> Option<ProtocolVersion> {
        self.conn.as_ref().and_then(Conn::protocol_version)
    }

    pub fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.conn
            .as_ref()
            .and_then(|conn| conn.alpn_protocol().map(<[u8]>::to_vec))
    }

    fn adopt(&mut self, stream: std::net::TcpStream) -> Result<(), SockError> {
        stream
            .set_nonblocking(true)
            .map_err(|err| map_io_error(CONFIGURE, &err))?;
        let stream = {
            let _guard = self.driver.runtime.enter();
            TcpStream::from_std(stream).map_err(|err| map_io_error(CONFIGURE, &err))?
        };
        self.install(stream)?;
        tracing::debug!(peer = ?self.peer_endpoint().ok(), "adopted connected tcp socket");
        Ok(())
    }

    fn install(&mut self, stream: TcpStream) -> Result<(), SockError> {
        self.config
            .apply_socket_options(SockRef::from(&stream))
            .map_err(|err| map_io_error(CONFIGURE, &err))?;
        stream
            .set_nodelay(self.config.nodelay)
            .map_err(|err| map_io_error(CONFIGURE, &err))?;
        self.conn = Some(Conn::Plain(stream));
        self.state = SessionState::Open;
        self.last_error = None;
        Ok(())
    }

    fn release(&mut self) {
        self.conn = None;
    }

    fn record(&mut self, err: SockError) -> SockError {
        self.last_error = Some(err.clone());
        err
    }

    fn observe_interrupt(&mut self, kind: OperationKind) -> Result<(), SockError> {
        if self.driver.interrupter.take_request() {
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
        if usable && self.conn.is_some() {
            Ok(())
        } else {
            Err(self.record(SockError::not_open(kind.code)))
        }
    }

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

    fn connect_any(&self, addrs: &[SocketAddr]) -> Result<TcpStream, SockError> {
        let deadline = Deadline::after(system_clock(), self.timeout);
        let mut last_error = None;
        for addr in addrs {
            let Some(budget) = deadline.remaining() else {
                break;
            };
            match self.driver.run(budget, CONNECT.code, TcpStream::connect(*addr)) {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(err)) => {
                    tracing::debug!(%addr, error = %err, "connect attempt failed");
                    last_error = Some(map_io_error(CONNECT, &err));
                }
                // 超时已耗尽整体预算，中断则要求立即返回。
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| SockError::timeout(CONNECT.code)))
    }
}

impl fmt::Debug for TokioBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioBackend")
            .field("state", &self.state)
            .field("peer", &self.peer_endpoint().ok())
            .field("tls", &self.tls_version())
            .field("timeout", &self.timeout)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl Transport for TokioBackend {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, SockError> {
        self.observe_interrupt(READ)?;
        self.require(READ, false)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = match self.conn.as_mut() {
            Some(conn) => {
                let tls = conn.is_tls();
                match self.driver.run(self.timeout, READ.code, conn.read(buf)) {
                    Ok(Ok(0)) if tls => Err(SockError::tls(
                        tls_error::READ.code,
                        TlsCode::ZeroReturn,
                        "peer sent close_notify",
                    )),
                    Ok(Ok(0)) => Err(SockError::eof(READ.code)),
                    Ok(Ok(n)) => {
                        tracing::trace!(bytes = n, tls, "tokio read");
                        Ok(n)
                    }
                    Ok(Err(err)) if tls => Err(tls_error::io_error(tls_error::READ, &err)),
                    Ok(Err(err)) => Err(map_io_error(READ, &err)),
                    Err(err) => Err(err),
                }
            }
            None => Err(SockError::not_open(READ.code)),
        };
        self.settle(READ, result)
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize, SockError> {
        self.observe_interrupt(WRITE)?;
        self.require(WRITE, true)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = match self.conn.as_mut() {
            Some(conn) => {
                let tls = conn.is_tls();
                match self.driver.run(self.timeout, WRITE.code, conn.write(buf)) {
                    Ok(Ok(n)) => {
                        tracing::trace!(bytes = n, tls, "tokio write");
                        Ok(n)
                    }
                    Ok(Err(err)) if tls => Err(tls_error::io_error(tls_error::WRITE, &err)),
                    Ok(Err(err)) => Err(map_io_error(WRITE, &err)),
                    Err(err) => Err(err),
                }
            }
            None => Err(SockError::not_open(WRITE.code)),
        };
        self.settle(WRITE, result)
    }

    fn flush(&mut self) -> Result<(), SockError> {
        self.observe_interrupt(WRITE)?;
        let result = match self.conn.as_mut() {
            Some(conn) if conn.is_tls() => {
                match self.driver.run(self.timeout, tls_error::FLUSH.code, conn.flush()) {
                    Ok(outcome) => {
                        outcome.map_err(|err| tls_error::io_error(tls_error::FLUSH, &err))
                    }
                    Err(err) => Err(err),
                }
            }
            _ => Ok(()),
        };
        self.settle(WRITE, result)
    }
}

impl SocketBackend for TokioBackend {
    type TlsParams = TlsParams;

    fn state(&self) -> SessionState {
        self.state
    }

    fn connect(&mut self, host: &str, service: &str) -> Result<(), SockError> {
        if self.conn.is_some() {
            tracing::debug!(state = %self.state, "connect ignored, socket already open");
            return Err(SockError::socket(CONNECT.code, SocketCode::AlreadyOpen));
        }
        self.driver.interrupter.clear();
        self.state = SessionState::Connecting;
        self.last_error = None;
        self.host = Some(host.to_owned());

        let connected = resolve(host, service).and_then(|addrs| self.connect_any(&addrs));
        match connected.and_then(|stream| self.install(stream)) {
            Ok(()) => {
                tracing::debug!(host, service, peer = ?self.peer_endpoint().ok(), "tokio connected");
                Ok(())
            }
            Err(err) => {
                self.release();
                self.state = if err.is_socket(SocketCode::Interrupted) {
                    SessionState::Closed
                } else {
                    SessionState::Errored
                };
                tracing::debug!(host, service, error = %err, "tokio connect failed");
                Err(self.record(err))
            }
        }
    }

    fn shutdown(&mut self) -> Result<(), SockError> {
        self.observe_interrupt(SHUTDOWN)?;
        self.require(SHUTDOWN, true)?;
        Transport::flush(self)?;
        let result = match self.conn.as_ref() {
            Some(conn) => SockRef::from(conn.tcp())
                .shutdown(Shutdown::Write)
                .map_err(|err| map_io_error(SHUTDOWN, &err)),
            None => Err(SockError::not_open(SHUTDOWN.code)),
        };
        self.settle(SHUTDOWN, result)?;
        self.state = SessionState::ShuttingDown;
        tracing::debug!("tokio write side shut down");
        Ok(())
    }

    fn close(&mut self) -> Result<(), SockError> {
        if let Some(conn) = self.conn.as_mut()
            && conn.is_tls()
            && !matches!(self.driver.run(self.timeout, CLOSE.code, conn.notify_close()), Ok(Ok(())))
        {
            tracing::debug!("close_notify not delivered during close");
        }
        let mut failure = None;
        if let Some(conn) = self.conn.take() {
            if let Err(err) = SockRef::from(conn.tcp()).shutdown(Shutdown::Both)
                && err.kind() != io::ErrorKind::NotConnected
            {
                failure = Some(map_io_error(CLOSE, &err));
            }
            drop(conn);
            tracing::debug!(previous = %self.state, "tokio socket closed");
        }
        self.driver.interrupter.clear();
        self.state = SessionState::Closed;
        match failure {
            Some(err) => Err(self.record(err)),
            None => Ok(()),
        }
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle::new(self.driver.interrupter.clone())
    }

    fn start_ssl(&mut self, params: TlsParams) -> Result<(), SockError> {
        self.observe_interrupt(START_SSL)?;
        if self.conn.as_ref().is_some_and(Conn::is_tls) {
            return Err(self.record(SockError::socket(START_SSL.code, SocketCode::TlsAlreadyActive)));
        }
        if self.state != SessionState::Open {
            return Err(self.record(SockError::not_open(START_SSL.code)));
        }
        let resolved = match params.resolve(self.host.as_deref()) {
            Ok(resolved) => resolved,
            Err(err) => return Err(self.record(err)),
        };
        let Some(Conn::Plain(tcp)) = self.conn.take() else {
            return Err(self.record(SockError::not_open(START_SSL.code)));
        };

        self.state = SessionState::SslNegotiating;
        let tcp = RecordStream::new(tcp);
        let handshake = tls_error::HANDSHAKE;
        let result = match resolved {
            ResolvedTls::Client {
                config,
                server_name,
            } => {
                let connector = TlsConnector::from(config);
                match self.driver.run(self.timeout, handshake.code, connector.connect(server_name, tcp)) {
                    Ok(outcome) => outcome
                        .map(|stream| Conn::Client(Box::new(stream)))
                        .map_err(|err| tls_error::io_error(handshake, &err)),
                    Err(err) => Err(err),
                }
            }
            ResolvedTls::Server { config } => {
                let acceptor = TlsAcceptor::from(config);
                match self.driver.run(self.timeout, handshake.code, acceptor.accept(tcp)) {
                    Ok(outcome) => outcome
                        .map(|stream| Conn::Server(Box::new(stream)))
                        .map_err(|err| tls_error::io_error(handshake, &err)),
                    Err(err) => Err(err),
                }
            }
        };
        self.observe_interrupt(START_SSL)?;
        match result {
            Ok(conn) => {
                tracing::debug!(
                    server = matches!(conn, Conn::Server(_)),
                    version = ?conn.protocol_version(),
                    alpn = ?conn.alpn_protocol().map(String::from_utf8_lossy),
                    "tls session established"
                );
                self.conn = Some(conn);
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
        let resume = if self.state == SessionState::ShuttingDown {
            SessionState::ShuttingDown
        } else {
            SessionState::Open
        };
        let result = match self.conn.take() {
            Some(Conn::Client(stream)) => stop_tls(&self.driver, self.timeout, stream),
            Some(Conn::Server(stream)) => stop_tls(&self.driver, self.timeout, stream),
            other => {
                self.conn = other;
                return Err(self.record(SockError::socket(STOP_SSL.code, SocketCode::TlsNotActive)));
            }
        };
        self.observe_interrupt(STOP_SSL)?;
        match result {
            Ok(Some(tcp)) => {
                self.conn = Some(Conn::Plain(tcp));
                self.state = resume;
                tracing::debug!("tls session closed, connection continues in plain text");
                Ok(TlsShutdown::Graceful)
            }
            Ok(None) => {
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
        self.conn.as_ref().is_some_and(Conn::is_tls)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 超时在每次操作时读取，修改立即作用于已打开的连接。
    fn set_timeout(&mut self, timeout: Duration) -> Duration {
        std::mem::replace(&mut self.timeout, timeout.max(MIN_TIMEOUT))
    }

    fn peer_endpoint(&self) -> Result<SocketAddr, SockError> {
        match self.conn.as_ref() {
            Some(conn) => conn.tcp().peer_addr().map_err(|err| map_io_error(ENDPOINT, &err)),
            None => Err(SockError::not_open(ENDPOINT.code)),
        }
    }

    fn sock_endpoint(&self) -> Result<SocketAddr, SockError> {
        match self.conn.as_ref() {
            Some(conn) => conn.tcp().local_addr().map_err(|err| map_io_error(ENDPOINT, &err)),
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
