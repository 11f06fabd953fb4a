//! 套接字流门面。
//!
//! [`SocketStream`] 把后端与缓冲核心的 `Result` 约定翻译为常规的流状态位：
//! 调用方在稳态 IO 中检查 [`good`](SocketStream::good)/[`fail`](SocketStream::fail)，
//! 而不是逐个匹配错误。

use crate::buffer::StreamBuf;
use crate::condition::SockErrc;
use crate::config::StreamConfig;
use crate::error::SockError;
use crate::transport::{InterruptHandle, SessionState, SocketBackend, TlsShutdown};
use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

/// 流状态位集合。
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IoState(u8);

impl IoState {
    pub const GOOD: IoState = IoState(0);
    /// 读取遇到了流结束。
    pub const EOF: IoState = IoState(1);
    /// 最近一次操作没有完成。
    pub const FAIL: IoState = IoState(1 << 1);
    /// 连接已不可用，只有 `reset()` 能恢复。
    pub const BAD: IoState = IoState(1 << 2);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: IoState) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: IoState) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_good(self) -> bool {
        self.0 == 0
    }

    /// 根据错误条件选择应置位的状态：超时只置 `FAIL`，流结束置 `EOF|FAIL`，其余一律 `FAIL|BAD`。
    pub fn for_error(error: &SockError) -> IoState {
        match SockErrc::classify(Some(error)) {
            SockErrc::Eof => IoState::EOF | IoState::FAIL,
            SockErrc::Timeout => IoState::FAIL,
            _ => IoState::FAIL | IoState::BAD,
        }
    }

    fn for_io_error(error: &io::Error) -> IoState {
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => IoState::FAIL,
            _ => IoState::FAIL | IoState::BAD,
        }
    }
}

impl BitOr for IoState {
    type Output = IoState;

    fn bitor(self, rhs: IoState) -> IoState {
        IoState(self.0 | rhs.0)
    }
}

impl BitOrAssign for IoState {
    fn bitor_assign(&mut self, rhs: IoState) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for IoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_good() {
            return f.write_str("IoState(GOOD)");
        }
        let mut names = Vec::with_capacity(3);
        for (flag, name) in [(IoState::EOF, "EOF"), (IoState::FAIL, "FAIL"), (IoState::BAD, "BAD")] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        write!(f, "IoState({})", names.join("|"))
    }
}

fn failed_stream() -> io::Error {
    io::Error::other("socket stream is in a failed state")
}

/// 带失败状态位的套接字流。
///
/// # 契约说明（What）
/// - `connect`/`shutdown`/`close`/`start_ssl`/`stop_ssl` 先检查失败状态，已失败时不做任何事并返回失败；
/// - 建连失败只置 `FAIL`；其余生命周期操作失败置 `FAIL|BAD`；
/// - 读写超时只置 `FAIL`，流结束置 `EOF`，硬错误置 `FAIL|BAD`；
/// - [`reset`](Self::reset) 无条件关闭后端并清除所有状态位，是出错后复用实例的唯一途径。
///
/// 所有权转移即 Rust 的移动语义；被移走的实例不再可用，也无需额外处理。
pub struct SocketStream<B: SocketBackend> {
    buf: StreamBuf<B>,
    state: IoState,
}

impl<B: SocketBackend> SocketStream<B> {
    pub fn new(backend: B) -> Self {
        Self::from_streambuf(StreamBuf::new(backend))
    }

    /// 按配置构造，并把超时写入后端。
    pub fn with_config(mut backend: B, config: &StreamConfig) -> Self {
        backend.set_timeout(config.timeout());
        Self::from_streambuf(StreamBuf::with_config(backend, config))
    }

    pub fn from_streambuf(buf: StreamBuf<B>) -> Self {
        Self {
            buf,
            state: IoState::GOOD,
        }
    }

    pub fn into_streambuf(self) -> StreamBuf<B> {
        self.buf
    }

    pub fn streambuf(&self) -> &StreamBuf<B> {
        &self.buf
    }

    pub fn streambuf_mut(&mut self) -> &mut StreamBuf<B> {
        &mut self.buf
    }

    pub fn backend(&self) -> &B {
        self.buf.get_ref()
    }

    pub fn rdstate(&self) -> IoState {
        self.state
    }

    pub fn setstate(&mut self, bits: IoState) {
        self.state |= bits;
    }

    /// 清除状态位，不触碰连接。
    pub fn clear(&mut self) {
        self.state = IoState::GOOD;
    }

    pub fn good(&self) -> bool {
        self.state.is_good()
    }

    pub fn eof(&self) -> bool {
        self.state.contains(IoState::EOF)
    }

    /// `FAIL` 或 `BAD` 任一置位。
    pub fn fail(&self) -> bool {
        self.state.intersects(IoState::FAIL | IoState::BAD)
    }

    pub fn bad(&self) -> bool {
        self.state.contains(IoState::BAD)
    }

    pub fn connect(&mut self, host: &str, service: &str) -> bool {
        if self.fail() {
            return false;
        }
        match self.buf.connect(host, service) {
            Ok(()) => true,
            Err(_) => {
                self.setstate(IoState::FAIL);
                false
            }
        }
    }

    pub fn shutdown(&mut self) -> bool {
        if self.fail() {
            return false;
        }
        let result = self.buf.shutdown();
        self.lifecycle(result).is_some()
    }

    pub fn close(&mut self) -> bool {
        if self.fail() {
            return false;
        }
        let result = self.buf.close();
        self.lifecycle(result).is_some()
    }

    pub fn start_ssl(&mut self, params: B::TlsParams) -> bool {
        if self.fail() {
            return false;
        }
        let result = self.buf.start_ssl(params);
        self.lifecycle(result).is_some()
    }

    /// 结束 TLS；失败时返回 `None`，此时连接已关闭。
    pub fn stop_ssl(&mut self) -> Option<TlsShutdown> {
        if self.fail() {
            return None;
        }
        let result = self.buf.stop_ssl();
        self.lifecycle(result)
    }

    /// 关闭后端并清除全部状态位与后端的粘滞错误。
    pub fn reset(&mut self) {
        if let Err(err) = self.buf.close() {
            tracing::debug!(error = %err, "close during reset reported an error");
        }
        self.buf.get_mut().clear_last_error();
        self.state = IoState::GOOD;
    }

    /// 刷出输出缓冲区。
    pub fn sync(&mut self) -> bool {
        if self.fail() {
            return false;
        }
        match self.buf.sync() {
            Ok(()) => true,
            Err(err) => {
                self.setstate(IoState::for_error(&err));
                false
            }
        }
    }

    /// 读满 `dst`；返回较少字节时按原因置位（流结束为 `EOF|FAIL`）。
    pub fn read_n(&mut self, dst: &mut [u8]) -> usize {
        if self.fail() {
            return 0;
        }
        let (n, error) = self.buf.read_n_inner(dst);
        if n < dst.len() {
            let bits = match error {
                Some(err) => IoState::for_error(&err),
                None => IoState::EOF | IoState::FAIL,
            };
            self.setstate(bits);
        }
        n
    }

    pub fn write_n(&mut self, src: &[u8]) -> usize {
        if self.fail() {
            return 0;
        }
        let (n, error) = self.buf.write_n_inner(src);
        if let Some(err) = error {
            self.setstate(IoState::for_error(&err));
        }
        n
    }

    pub fn state(&self) -> SessionState {
        self.buf.get_ref().state()
    }

    pub fn is_open(&self) -> bool {
        self.buf.is_open()
    }

    pub fn ssl_started(&self) -> bool {
        self.buf.ssl_started()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.buf.interrupt_handle()
    }

    pub fn timeout(&self) -> Duration {
        self.buf.timeout()
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Duration {
        self.buf.set_timeout(timeout)
    }

    pub fn last_error(&self) -> Option<&SockError> {
        self.buf.last_error()
    }

    pub fn peer_address(&self) -> Result<String, SockError> {
        self.buf.peer_address()
    }

    pub fn peer_port(&self) -> Result<u16, SockError> {
        self.buf.peer_port()
    }

    pub fn sock_address(&self) -> Result<String, SockError> {
        self.buf.sock_address()
    }

    pub fn sock_port(&self) -> Result<u16, SockError> {
        self.buf.sock_port()
    }

    fn lifecycle<R>(&mut self, result: Result<R, SockError>) -> Option<R> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(error = %err, op = err.operation(), "stream entered failed state");
                self.setstate(IoState::FAIL | IoState::BAD);
                None
            }
        }
    }
}

impl<B: SocketBackend + Default> Default for SocketStream<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: SocketBackend> Read for SocketStream<B> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if self.fail() {
            return Err(failed_stream());
        }
        match self.buf.read(dst) {
            Ok(0) if !dst.is_empty() => {
                self.setstate(IoState::EOF);
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err) => {
                self.setstate(IoState::for_io_error(&err));
                Err(err)
            }
        }
    }
}

impl<B: SocketBackend> BufRead for SocketStream<B> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.fail() {
            return Err(failed_stream());
        }
        match self.buf.fill_buf() {
            Ok(bytes) => {
                if bytes.is_empty() {
                    self.state |= IoState::EOF;
                }
                Ok(bytes)
            }
            Err(err) => {
                self.state |= IoState::for_io_error(&err);
                Err(err)
            }
        }
    }

    fn consume(&mut self, amt: usize) {
        self.buf.consume(amt);
    }
}

impl<B: SocketBackend> Write for SocketStream<B> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        if self.fail() {
            return Err(failed_stream());
        }
        match self.buf.write_n_inner(src) {
            (0, Some(err)) => {
                self.setstate(IoState::for_error(&err));
                Err(err.into())
            }
            (n, error) => {
                if let Some(err) = error {
                    self.setstate(IoState::for_error(&err));
                }
                Ok(n)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.sync() {
            Ok(())
        } else {
            Err(self
                .last_error()
                .cloned()
                .map_or_else(failed_stream, io::Error::from))
        }
    }
}

impl<B: SocketBackend + fmt::Debug> fmt::Debug for SocketStream<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketStream")
            .field("state", &self.state)
            .field("buf", &self.buf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_lists_set_bits() {
        assert_eq!(format!("{:?}", IoState::GOOD), "IoState(GOOD)");
        assert_eq!(format!("{:?}", IoState::FAIL | IoState::BAD), "IoState(FAIL|BAD)");
    }

    #[test]
    fn timeout_sets_fail_only() {
        let bits = IoState::for_error(&SockError::timeout("netstream.test"));
        assert_eq!(bits, IoState::FAIL);
        let bits = IoState::for_error(&SockError::eof("netstream.test"));
        assert_eq!(bits, IoState::EOF | IoState::FAIL);
    }
}
