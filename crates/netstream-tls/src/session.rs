//! 阻塞式 TLS 会话驱动。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 阻塞套接字后端需要在同一个句柄上按需开启、结束 TLS，`rustls` 只提供状态机，
//!   记录的收发需要由调用方驱动；
//! - 本模块把“读一条记录、解密、必要时回写”的循环集中在一处，后端只负责提供字节通道。
//!
//! ## 逻辑（How）
//! - `handshake`：以截止时间为界反复执行 `complete_io`，每轮开始前把剩余预算写入通道；
//! - `read`：先取已解密的明文，不足时读取一批密文并交给 `process_new_packets`；
//!   `close_notify` 映射为 [`TlsCode::ZeroReturn`]，无 `close_notify` 的传输关闭映射为
//!   [`TlsCode::UnexpectedEof`]；
//! - `write`：先推送积压的记录，再接受明文并尝试立即推送；推送失败时记录保留在会话中，
//!   由下一次 `write`/`flush` 重试并报告；
//! - `shutdown`：发送 `close_notify` 后读取并丢弃对端数据，直到观察到三种结局之一；
//! - 所有密文读取都经过 [`RecordFraming`] 截断，单次读取不越过当前记录的末尾。
//!
//! ## 契约（What）
//! - 会话不持有套接字，所有方法通过参数接收字节通道，所有权仍属于后端；
//! - `rustls` 缓冲的密文从不越过对端 `close_notify` 所在的记录，
//!   紧随其后的明文留在套接字中，由回到明文阶段的后端读取；
//! - 单线程驱动，不加锁。

use crate::error::{io_error, tls_error, FLUSH, HANDSHAKE, READ, SHUTDOWN, WRITE};
use crate::framing::RecordFraming;
use netstream_core::time::Deadline;
use netstream_core::{ErrorDomain, SockError, SocketCode, TlsCode, TlsShutdown};
use rustls::{Connection, ProtocolVersion};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// 可以为多步操作设置剩余时间预算的字节通道。
pub trait TimedIo: Read + Write {
    /// 限制后续单次读写的最长阻塞时间。
    fn set_budget(&mut self, budget: Duration) -> io::Result<()>;
}

impl TimedIo for &TcpStream {
    fn set_budget(&mut self, budget: Duration) -> io::Result<()> {
        let budget = Some(budget.max(Duration::from_millis(1)));
        self.set_read_timeout(budget)?;
        self.set_write_timeout(budget)
    }
}

impl TimedIo for TcpStream {
    fn set_budget(&mut self, budget: Duration) -> io::Result<()> {
        <&TcpStream as TimedIo>::set_budget(&mut &*self, budget)
    }
}

fn write_zero(kind: &'static str) -> SockError {
    SockError::new(
        ErrorDomain::Socket,
        SocketCode::Io as i32,
        io::ErrorKind::WriteZero,
        kind,
        "transport accepted no tls records",
    )
}

/// 经 [`RecordFraming`] 截断每次读取的通道。
struct Framed<'a, S> {
    io: &'a mut S,
    framing: &'a mut RecordFraming,
}

impl<S: Read> Read for Framed<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = self.framing.next_read_len(buf.len());
        let n = self.io.read(&mut buf[..want])?;
        self.framing.consume(&buf[..n]);
        Ok(n)
    }
}

impl<S: Write> Write for Framed<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.io.flush()
    }
}

/// 对端已经离开时的写/读错误：在关闭交换中视为“传输已关闭”。
fn peer_gone(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

/// 一条 TLS 会话。
pub struct TlsSession {
    conn: Connection,
    framing: RecordFraming,
}

impl TlsSession {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            framing: RecordFraming::default(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    pub fn is_server(&self) -> bool {
        matches!(self.conn, Connection::Server(_))
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.conn.protocol_version()
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.conn.alpn_protocol()
    }

    /// 完成握手，整体耗时受 `deadline` 约束。
    pub fn handshake<S: TimedIo>(&mut self, io: &mut S, deadline: &Deadline) -> Result<(), SockError> {
        while self.conn.is_handshaking() {
            let budget = deadline
                .remaining()
                .ok_or_else(|| SockError::timeout(HANDSHAKE.code))?;
            io.set_budget(budget).map_err(|err| io_error(HANDSHAKE, &err))?;
            let mut framed = Framed {
                io: &mut *io,
                framing: &mut self.framing,
            };
            self.conn
                .complete_io(&mut framed)
                .map_err(|err| io_error(HANDSHAKE, &err))?;
        }
        // 握手结束后可能仍有待发送的记录（客户端 Finished、服务端会话票据）。
        self.flush_with(io, HANDSHAKE.code)
    }

    /// 读取解密后的明文。`buf` 为空时直接返回 `Ok(0)`。
    pub fn read<S: Read + Write>(&mut self, io: &mut S, buf: &mut [u8]) -> Result<usize, SockError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.conn.reader().read(buf) {
                Ok(0) => {
                    return Err(SockError::tls(
                        READ.code,
                        TlsCode::ZeroReturn,
                        "peer sent close_notify",
                    ));
                }
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(io_error(READ, &err)),
            }
            if self.conn.wants_write() {
                self.flush_with(io, READ.code)?;
            }
            let mut framed = Framed {
                io: &mut *io,
                framing: &mut self.framing,
            };
            self.conn
                .read_tls(&mut framed)
                .map_err(|err| io_error(READ, &err))?;
            if let Err(err) = self.conn.process_new_packets() {
                // 尽力把 rustls 排队的告警发给对端。
                let _ = self.conn.write_tls(io);
                return Err(tls_error(READ, &err));
            }
        }
    }

    /// 加密并发送明文，返回被会话接受的字节数。
    pub fn write<S: Read + Write>(&mut self, io: &mut S, buf: &[u8]) -> Result<usize, SockError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.flush_with(io, WRITE.code)?;
        let accepted = self
            .conn
            .writer()
            .write(buf)
            .map_err(|err| io_error(WRITE, &err))?;
        if let Err(err) = self.flush_with(io, WRITE.code) {
            tracing::trace!(error = %err, accepted, "tls records deferred to the next flush");
        }
        Ok(accepted)
    }

    /// 推送会话中积压的全部记录。
    pub fn flush<S: Read + Write>(&mut self, io: &mut S) -> Result<(), SockError> {
        self.flush_with(io, FLUSH.code)
    }

    fn flush_with<S: Read + Write>(&mut self, io: &mut S, op: &'static str) -> Result<(), SockError> {
        while self.conn.wants_write() {
            match self.conn.write_tls(io) {
                Ok(0) => return Err(write_zero(op)),
                Ok(_) => {}
                Err(err) => return Err(SockError::from_io(op, &err)),
            }
        }
        io.flush().map_err(|err| SockError::from_io(op, &err))
    }

    /// 只发送 `close_notify`，不等待对端回复。
    pub fn notify_close<S: Read + Write>(&mut self, io: &mut S) -> Result<(), SockError> {
        self.conn.send_close_notify();
        self.flush_with(io, SHUTDOWN.code)
    }

    /// 执行 `close_notify` 交换。
    ///
    /// # 契约说明（What）
    /// - `Ok(Graceful)`：对端回复了 `close_notify`，底层连接可以继续以明文使用；
    /// - `Ok(TransportClosed)`：对端未回复而直接关闭（或复位）了传输层；
    /// - `Err`：协议违规或超过截止时间，调用方必须关闭套接字。
    ///
    /// 交换期间收到的应用数据被丢弃；对端在 `close_notify` 之后发送的明文不被读取。
    pub fn shutdown<S: TimedIo>(
        &mut self,
        io: &mut S,
        deadline: &Deadline,
    ) -> Result<TlsShutdown, SockError> {
        self.conn.send_close_notify();
        let budget = deadline
            .remaining()
            .ok_or_else(|| SockError::timeout(SHUTDOWN.code))?;
        io.set_budget(budget).map_err(|err| io_error(SHUTDOWN, &err))?;
        while self.conn.wants_write() {
            match self.conn.write_tls(io) {
                Ok(0) => return Ok(TlsShutdown::TransportClosed),
                Ok(_) => {}
                Err(err) if peer_gone(&err) => return Ok(TlsShutdown::TransportClosed),
                Err(err) => return Err(io_error(SHUTDOWN, &err)),
            }
        }

        let mut scratch = [0u8; 2048];
        loop {
            loop {
                match self.conn.reader().read(&mut scratch) {
                    Ok(0) => return Ok(TlsShutdown::Graceful),
                    Ok(discarded) => {
                        tracing::trace!(discarded, "discarding application data during tls shutdown");
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                        return Ok(TlsShutdown::TransportClosed);
                    }
                    Err(err) => return Err(io_error(SHUTDOWN, &err)),
                }
            }

            let budget = deadline
                .remaining()
                .ok_or_else(|| SockError::timeout(SHUTDOWN.code))?;
            io.set_budget(budget).map_err(|err| io_error(SHUTDOWN, &err))?;
            let mut framed = Framed {
                io: &mut *io,
                framing: &mut self.framing,
            };
            match self.conn.read_tls(&mut framed) {
                Ok(0) => return Ok(TlsShutdown::TransportClosed),
                Ok(_) => {}
                Err(err) if peer_gone(&err) => return Ok(TlsShutdown::TransportClosed),
                Err(err) => return Err(io_error(SHUTDOWN, &err)),
            }
            match self.conn.process_new_packets() {
                Ok(state) if state.peer_has_closed() => return Ok(TlsShutdown::Graceful),
                Ok(_) => {}
                Err(err) => return Err(tls_error(SHUTDOWN, &err)),
            }
        }
    }
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("server", &self.is_server())
            .field("handshaking", &self.is_handshaking())
            .field("version", &self.protocol_version())
            .finish()
    }
}
