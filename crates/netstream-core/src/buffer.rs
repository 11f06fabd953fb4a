//! 缓冲读写核心。
//!
//! # 教案级注释
//!
//! ## 逻辑（How）
//! - 一块连续内存一分为二：前半为输入区，后半为输出区；每个区由 [`BufferArea`]
//!   的 `{begin, read, write, end}` 四元组描述，指针运算不离开本模块；
//! - 读取先消费输入区，输入区为空且开启自绑定（tie）时，先完整刷出输出区再阻塞读取，
//!   避免请求/响应协议在半双工下互相等待；
//! - 超过输入区一半的读取请求绕过缓冲，直接循环调用 `read_some` 填充调用方内存；
//! - 写入优先进入输出区，满时刷出；不小于输出区容量的请求在刷出残留后直接写出。
//!
//! ## 契约（What）
//! - 不变量：两个区始终满足 `begin <= read <= write <= end`，容量在初始化后固定；
//! - 刷出中途失败时，未发出的字节被压缩到输出区起始处，不丢失；
//! - 除绕过缓冲的 `read_all`/`write_all` 循环外，不对零进展的传输结果做任何重试，
//!   是否等待由后端的超时处理决定。

use crate::condition::SockErrc;
use crate::config::StreamConfig;
use crate::error::{BufferError, ErrorDomain, SockError, SocketCode};
use crate::transport::{InterruptHandle, SocketBackend, TlsShutdown, Transport};
use std::io::{self, BufRead, Read, Write};
use std::time::Duration;

/// 缓冲区总大小下限，低于该值的请求回退到默认值。
pub const MIN_BUFFER_SIZE: usize = 128;
/// 默认缓冲区总大小，输入与输出各占一半。
pub const DEFAULT_BUFFER_SIZE: usize = 8192;
/// 缓冲区总大小上限，超出视为溢出并回退到默认值。
pub const MAX_BUFFER_SIZE: usize = 1 << 30;

const OP_WRITE: &str = "netstream.stream.write_failed";

/// 缓冲区内一个区域的游标。
///
/// `[read, write)` 为有效数据：输入区中是尚未被消费的已读字节，输出区中是尚未刷出的字节。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferArea {
    begin: usize,
    read: usize,
    write: usize,
    end: usize,
}

impl BufferArea {
    const fn new(begin: usize, end: usize) -> Self {
        Self {
            begin,
            read: begin,
            write: begin,
            end,
        }
    }

    pub fn capacity(&self) -> usize {
        self.end - self.begin
    }

    /// 有效数据字节数。
    pub fn len(&self) -> usize {
        self.write - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// 写游标之后的剩余空间。
    pub fn spare(&self) -> usize {
        self.end - self.write
    }

    fn reset(&mut self) {
        self.read = self.begin;
        self.write = self.begin;
    }

    fn consume(&mut self, n: usize) {
        self.read += n;
        self.check();
        if self.read == self.write {
            self.reset();
        }
    }

    fn commit(&mut self, n: usize) {
        self.write += n;
        self.check();
    }

    fn filled<'a>(&self, block: &'a [u8]) -> &'a [u8] {
        &block[self.read..self.write]
    }

    fn spare_mut<'a>(&self, block: &'a mut [u8]) -> &'a mut [u8] {
        &mut block[self.write..self.end]
    }

    /// 把有效数据搬到区域起始处。
    fn compact(&mut self, block: &mut [u8]) {
        if self.read > self.begin {
            let len = self.len();
            block.copy_within(self.read..self.write, self.begin);
            self.read = self.begin;
            self.write = self.begin + len;
        }
        self.check();
    }

    fn check(&self) {
        debug_assert!(
            self.begin <= self.read && self.read <= self.write && self.write <= self.end,
            "buffer area invariant violated: {self:?}"
        );
    }
}

fn normalize_size(size: usize) -> usize {
    if (MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&size) {
        size
    } else {
        tracing::debug!(requested = size, fallback = DEFAULT_BUFFER_SIZE, "buffer size out of range");
        DEFAULT_BUFFER_SIZE
    }
}

fn write_zero() -> SockError {
    SockError::new(
        ErrorDomain::Socket,
        SocketCode::Io as i32,
        io::ErrorKind::WriteZero,
        OP_WRITE,
        "transport accepted no bytes",
    )
}

fn eof_as_zero(result: Result<usize, SockError>) -> io::Result<usize> {
    match result {
        Ok(n) => Ok(n),
        Err(err) if err == SockErrc::Eof => Ok(0),
        Err(err) => Err(err.into()),
    }
}

/// 建立在 [`Transport`] 之上的双缓冲字节流。
///
/// # 契约说明（What）
/// - [`read_n`](Self::read_n)：尽量读满 `dst`，仅在流结束或出错时返回较少字节；
/// - [`write_n`](Self::write_n)：返回被接受（已发出或已缓冲）的字节数；
/// - [`sync`](Self::sync)：立即刷出输出区，失败应视为硬 IO 错误；
/// - `io::Read::read` 至多触发一次传输读取，适合行协议，流结束表现为 `Ok(0)`；
/// - 释放时尽力刷出剩余输出，与 `std::io::BufWriter` 相同。
///
/// 单线程契约：同一实例只由一个线程驱动，内部不加锁。
pub struct StreamBuf<T: Transport> {
    transport: T,
    block: Box<[u8]>,
    input: BufferArea,
    output: BufferArea,
    self_tie: bool,
    configured_size: usize,
}

impl<T: Transport> StreamBuf<T> {
    /// 以默认配置包装传输，缓冲区在首次使用时分配。
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, &StreamConfig::default())
    }

    pub fn with_config(transport: T, config: &StreamConfig) -> Self {
        Self {
            transport,
            block: Box::default(),
            input: BufferArea::default(),
            output: BufferArea::default(),
            self_tie: config.self_tie,
            configured_size: config.buffer_size,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// 直接访问传输；绕过缓冲写入的字节会排在已缓冲字节之前到达对端。
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// 分配 `size` 字节并均分为输入/输出区；越界时回退到 [`DEFAULT_BUFFER_SIZE`]。
    ///
    /// 重新初始化会清空两个区的游标。
    pub fn init_buffers(&mut self, size: usize) {
        let size = normalize_size(size);
        self.configured_size = size;
        let dropped = self.input.len() + self.output.len();
        if dropped > 0 {
            tracing::debug!(dropped, "reinitialising stream buffers discards buffered bytes");
        }
        self.install(vec![0; size].into_boxed_slice());
    }

    /// 使用调用方提供的内存作为缓冲区。
    ///
    /// 小于 [`MIN_BUFFER_SIZE`] 的内存被拒绝，回退到内部默认缓冲区；
    /// 仍有未读或未刷出的数据时返回 [`BufferError::Active`]。
    pub fn set_buffer(&mut self, buffer: Vec<u8>) -> Result<(), BufferError> {
        if !self.input.is_empty() || !self.output.is_empty() {
            return Err(BufferError::Active {
                input: self.input.len(),
                output: self.output.len(),
            });
        }
        if buffer.len() < MIN_BUFFER_SIZE {
            tracing::debug!(len = buffer.len(), "caller buffer below minimum, using default");
            self.init_buffers(DEFAULT_BUFFER_SIZE);
        } else {
            self.configured_size = buffer.len();
            self.install(buffer.into_boxed_slice());
        }
        Ok(())
    }

    fn install(&mut self, block: Box<[u8]>) {
        let half = block.len() / 2;
        self.input = BufferArea::new(0, half);
        self.output = BufferArea::new(half, block.len());
        self.block = block;
    }

    fn ensure_buffers(&mut self) {
        if self.block.is_empty() {
            self.init_buffers(self.configured_size);
        }
    }

    /// 两个区的总容量。
    pub fn buffer_size(&self) -> usize {
        if self.block.is_empty() {
            normalize_size(self.configured_size)
        } else {
            self.block.len()
        }
    }

    pub fn input_area(&self) -> BufferArea {
        self.input
    }

    pub fn output_area(&self) -> BufferArea {
        self.output
    }

    /// 已缓冲、可立即读取的字节数。
    pub fn available(&self) -> usize {
        self.input.len()
    }

    /// 等待刷出的字节数。
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    pub fn self_tie(&self) -> bool {
        self.self_tie
    }

    /// 设置自绑定并返回旧值。
    pub fn set_self_tie(&mut self, tie: bool) -> bool {
        std::mem::replace(&mut self.self_tie, tie)
    }

    /// 读取至多 `dst.len()` 字节，尽量读满。
    pub fn read_n(&mut self, dst: &mut [u8]) -> usize {
        self.read_n_inner(dst).0
    }

    /// 写入 `src`，返回被接受的字节数。
    pub fn write_n(&mut self, src: &[u8]) -> usize {
        self.write_n_inner(src).0
    }

    /// 刷出输出区，并要求传输推送其自身暂存的数据。
    pub fn sync(&mut self) -> Result<(), SockError> {
        self.flush_output()?;
        self.transport.flush()
    }

    /// 丢弃两个区的内容，不做任何 IO。
    pub fn discard_buffers(&mut self) {
        self.input.reset();
        self.output.reset();
    }

    pub(crate) fn read_n_inner(&mut self, dst: &mut [u8]) -> (usize, Option<SockError>) {
        self.ensure_buffers();
        let mut total = self.take_input(dst);
        while total < dst.len() {
            let remaining = dst.len() - total;
            if remaining > self.input.capacity() / 2 {
                if let Err(err) = self.tie_flush() {
                    return (total, Some(err));
                }
                match self.transport.read_some(&mut dst[total..]) {
                    Ok(0) => return (total, None),
                    Ok(n) => total += n,
                    Err(err) => return (total, Some(err)),
                }
            } else {
                match self.underflow() {
                    Ok(0) => return (total, None),
                    Ok(_) => total += self.take_input(&mut dst[total..]),
                    Err(err) => return (total, Some(err)),
                }
            }
        }
        (total, None)
    }

    pub(crate) fn write_n_inner(&mut self, src: &[u8]) -> (usize, Option<SockError>) {
        self.ensure_buffers();
        if src.is_empty() {
            return (0, None);
        }
        self.output.compact(&mut self.block);
        if src.len() <= self.output.spare() {
            return (self.put_output(src), None);
        }

        if src.len() >= self.output.capacity() {
            if let Err(err) = self.flush_output() {
                return (0, Some(err));
            }
            let mut written = 0;
            while written < src.len() {
                match self.transport.write_some(&src[written..]) {
                    Ok(0) => return (written, Some(write_zero())),
                    Ok(n) => written += n,
                    Err(err) => return (written, Some(err)),
                }
            }
            tracing::trace!(bytes = written, "wrote past the output buffer");
            return (written, None);
        }

        let mut accepted = 0;
        while accepted < src.len() {
            accepted += self.put_output(&src[accepted..]);
            if accepted < src.len()
                && let Err(err) = self.flush_output()
            {
                return (accepted, Some(err));
            }
        }
        (accepted, None)
    }

    fn put_output(&mut self, src: &[u8]) -> usize {
        let spare = self.output.spare_mut(&mut self.block);
        let n = spare.len().min(src.len());
        spare[..n].copy_from_slice(&src[..n]);
        self.output.commit(n);
        n
    }

    fn take_input(&mut self, dst: &mut [u8]) -> usize {
        let filled = self.input.filled(&self.block);
        let n = filled.len().min(dst.len());
        dst[..n].copy_from_slice(&filled[..n]);
        self.input.consume(n);
        n
    }

    fn flush_output(&mut self) -> Result<(), SockError> {
        while !self.output.is_empty() {
            let result = self.transport.write_some(self.output.filled(&self.block));
            match result {
                Ok(0) => {
                    self.output.compact(&mut self.block);
                    return Err(write_zero());
                }
                Ok(n) => self.output.consume(n),
                Err(err) => {
                    self.output.compact(&mut self.block);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn tie_flush(&mut self) -> Result<(), SockError> {
        if self.self_tie {
            self.sync()?;
        }
        Ok(())
    }

    /// 输入区为空时执行一次传输读取。
    fn underflow(&mut self) -> Result<usize, SockError> {
        debug_assert!(self.input.is_empty());
        self.tie_flush()?;
        self.input.reset();
        let spare = self.input.spare_mut(&mut self.block);
        let n = self.transport.read_some(spare)?;
        self.input.commit(n);
        Ok(n)
    }
}

impl<B: SocketBackend> StreamBuf<B> {
    /// 建立连接；成功后清空两个区的残留。
    pub fn connect(&mut self, host: &str, service: &str) -> Result<(), SockError> {
        self.transport.connect(host, service)?;
        self.ensure_buffers();
        self.discard_buffers();
        Ok(())
    }

    /// 刷出输出后对底层套接字执行写方向半关闭。
    pub fn shutdown(&mut self) -> Result<(), SockError> {
        self.sync()?;
        self.transport.shutdown()
    }

    /// 尽力刷出输出、关闭后端并清空缓冲区；返回第一个失败。
    pub fn close(&mut self) -> Result<(), SockError> {
        let flushed = if self.transport.is_open() && !self.output.is_empty() {
            self.sync()
        } else {
            Ok(())
        };
        let closed = self.transport.close();
        self.discard_buffers();
        flushed.and(closed)
    }

    /// 刷出输出后在当前连接上开启 TLS。
    ///
    /// 输入区中已缓冲的字节属于明文阶段，仍会先于 TLS 数据交付。
    pub fn start_ssl(&mut self, params: B::TlsParams) -> Result<(), SockError> {
        self.sync()?;
        self.transport.start_ssl(params)
    }

    /// 刷出输出后结束 TLS 会话；刷出失败同样按失败路径关闭套接字。
    pub fn stop_ssl(&mut self) -> Result<TlsShutdown, SockError> {
        if let Err(err) = self.sync() {
            if let Err(close_err) = self.transport.close() {
                tracing::debug!(error = %close_err, "close after failed tls flush reported an error");
            }
            self.discard_buffers();
            return Err(err);
        }
        let outcome = self.transport.stop_ssl();
        if !self.transport.is_open() {
            self.discard_buffers();
        }
        outcome
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.transport.interrupt_handle()
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn ssl_started(&self) -> bool {
        self.transport.ssl_started()
    }

    pub fn timeout(&self) -> Duration {
        self.transport.timeout()
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Duration {
        self.transport.set_timeout(timeout)
    }

    pub fn last_error(&self) -> Option<&SockError> {
        self.transport.last_error()
    }

    pub fn peer_address(&self) -> Result<String, SockError> {
        self.transport.peer_endpoint().map(|addr| addr.ip().to_string())
    }

    pub fn peer_port(&self) -> Result<u16, SockError> {
        self.transport.peer_endpoint().map(|addr| addr.port())
    }

    pub fn sock_address(&self) -> Result<String, SockError> {
        self.transport.sock_endpoint().map(|addr| addr.ip().to_string())
    }

    pub fn sock_port(&self) -> Result<u16, SockError> {
        self.transport.sock_endpoint().map(|addr| addr.port())
    }
}

impl<T: Transport> Read for StreamBuf<T> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        self.ensure_buffers();
        if !self.input.is_empty() {
            return Ok(self.take_input(dst));
        }
        let result = if dst.len() > self.input.capacity() / 2 {
            self.tie_flush()
                .and_then(|()| self.transport.read_some(dst))
        } else {
            self.underflow().map(|_| self.take_input(dst))
        };
        eof_as_zero(result)
    }
}

impl<T: Transport> BufRead for StreamBuf<T> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.ensure_buffers();
        if self.input.is_empty() {
            match self.underflow() {
                Ok(_) => {}
                Err(err) if err == SockErrc::Eof => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(self.input.filled(&self.block))
    }

    fn consume(&mut self, amt: usize) {
        let n = amt.min(self.input.len());
        self.input.consume(n);
    }
}

impl<T: Transport> Write for StreamBuf<T> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        match self.write_n_inner(src) {
            (0, Some(err)) => Err(err.into()),
            (n, _) => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(io::Error::from)
    }
}

impl<T: Transport> Drop for StreamBuf<T> {
    fn drop(&mut self) {
        if !std::thread::panicking() && !self.output.is_empty() {
            let _ = self.sync();
        }
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for StreamBuf<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuf")
            .field("transport", &self.transport)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("self_tie", &self.self_tie)
            .finish()
    }
}
