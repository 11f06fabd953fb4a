use std::borrow::Cow;
use std::fmt;
use std::io;

/// 错误码所属的域。
///
/// `System` 携带操作系统原始错误码（errno / WSA 错误码），`Socket` 与 `Tls`
/// 携带本库定义的稳定码值，分别见 [`SocketCode`] 与 [`TlsCode`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    System,
    Socket,
    Tls,
}

impl ErrorDomain {
    /// 日志中使用的域名称。
    pub const fn name(self) -> &'static str {
        match self {
            ErrorDomain::System => "system",
            ErrorDomain::Socket => "socket",
            ErrorDomain::Tls => "tls",
        }
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 套接字层的库级错误码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
#[non_exhaustive]
pub enum SocketCode {
    /// 对端干净地结束了字节流（`recv` 返回 0）。
    Eof = 1,
    /// 单次操作超过了配置的超时时长。
    Timeout = 2,
    /// 其他线程调用了 `interrupt()`。
    Interrupted = 3,
    /// 会话未处于可读写状态。
    NotOpen = 4,
    /// 会话已经打开，拒绝重复建连。
    AlreadyOpen = 5,
    /// 地址或服务名无法解析。
    ResolveFailed = 6,
    /// TLS 会话已经激活。
    TlsAlreadyActive = 7,
    /// 当前没有激活的 TLS 会话。
    TlsNotActive = 8,
    /// 没有携带系统错误码的 IO 失败。
    Io = 9,
}

impl SocketCode {
    const fn description(self) -> &'static str {
        match self {
            SocketCode::Eof => "end of stream",
            SocketCode::Timeout => "operation timed out",
            SocketCode::Interrupted => "operation interrupted",
            SocketCode::NotOpen => "socket is not open",
            SocketCode::AlreadyOpen => "socket is already open",
            SocketCode::ResolveFailed => "address resolution failed",
            SocketCode::TlsAlreadyActive => "tls session is already active",
            SocketCode::TlsNotActive => "tls session is not active",
            SocketCode::Io => "i/o failure",
        }
    }

    const fn io_kind(self) -> io::ErrorKind {
        match self {
            SocketCode::Eof => io::ErrorKind::UnexpectedEof,
            SocketCode::Timeout => io::ErrorKind::TimedOut,
            // 不能映射为 `ErrorKind::Interrupted`：标准库的 `read_exact` 等循环会把它当作可重试信号。
            SocketCode::Interrupted => io::ErrorKind::ConnectionAborted,
            SocketCode::NotOpen => io::ErrorKind::NotConnected,
            SocketCode::AlreadyOpen => io::ErrorKind::AlreadyExists,
            SocketCode::ResolveFailed => io::ErrorKind::InvalidInput,
            SocketCode::TlsAlreadyActive | SocketCode::TlsNotActive => io::ErrorKind::InvalidInput,
            SocketCode::Io => io::ErrorKind::Other,
        }
    }
}

/// TLS 层的库级错误码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
#[non_exhaustive]
pub enum TlsCode {
    /// 对端发送了 `close_notify`，TLS 会话干净结束。
    ZeroReturn = 1,
    /// 传输层在没有 `close_notify` 的情况下关闭。
    UnexpectedEof = 2,
    /// 握手失败。
    Handshake = 3,
    /// 记录层协议违规（解密失败、非法消息等）。
    Protocol = 4,
    /// 证书校验失败。
    Certificate = 5,
    /// TLS 参数或上下文使用错误。
    Config = 6,
    /// TLS 库内部错误。
    Internal = 7,
}

impl TlsCode {
    const fn io_kind(self) -> io::ErrorKind {
        match self {
            TlsCode::ZeroReturn | TlsCode::UnexpectedEof => io::ErrorKind::UnexpectedEof,
            TlsCode::Config => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::InvalidData,
        }
    }
}

/// 套接字流的统一错误对象，也是后端“最后错误”的载体。
///
/// # 契约说明（What）
/// - `domain` + `code` 组成可机读的错误码，`SockErrc` 的等价判定只依赖这两项与 `kind`；
/// - `operation` 为稳定操作码（如 `netstream.transport.tcp.read_failed`），便于日志聚合；
/// - `message` 面向排障人员；
/// - `Display` 输出 `<域>:<码>, <消息>`，可直接写入日志。
///
/// 错误对象可克隆，后端把它作为粘滞的 `last_error` 保存，同时返回给调用方。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SockError {
    domain: ErrorDomain,
    code: i32,
    kind: io::ErrorKind,
    operation: &'static str,
    message: Cow<'static, str>,
}

impl SockError {
    /// 以完整字段构造错误。
    pub fn new(
        domain: ErrorDomain,
        code: i32,
        kind: io::ErrorKind,
        operation: &'static str,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            domain,
            code,
            kind,
            operation,
            message: message.into(),
        }
    }

    /// 映射标准库 IO 错误。
    ///
    /// 携带系统错误码时保留在 `System` 域；超时类错误（`TimedOut`/`WouldBlock`，
    /// 后者是 POSIX 上 `SO_RCVTIMEO` 到期的表现）仍归入 `SockErrc::Timeout`。
    pub fn from_io(operation: &'static str, error: &io::Error) -> Self {
        let kind = error.kind();
        match error.raw_os_error() {
            Some(code) => Self::new(ErrorDomain::System, code, kind, operation, error.to_string()),
            None => match kind {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                    Self::socket(operation, SocketCode::Timeout)
                }
                _ => Self::new(
                    ErrorDomain::Socket,
                    SocketCode::Io as i32,
                    kind,
                    operation,
                    error.to_string(),
                ),
            },
        }
    }

    /// 构造库级套接字错误，消息取自错误码的默认描述。
    pub fn socket(operation: &'static str, code: SocketCode) -> Self {
        Self::new(
            ErrorDomain::Socket,
            code as i32,
            code.io_kind(),
            operation,
            code.description(),
        )
    }

    /// 构造 TLS 错误。
    pub fn tls(operation: &'static str, code: TlsCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorDomain::Tls, code as i32, code.io_kind(), operation, message)
    }

    /// 对端干净关闭（`recv` 返回 0）。
    pub fn eof(operation: &'static str) -> Self {
        Self::socket(operation, SocketCode::Eof)
    }

    pub fn timeout(operation: &'static str) -> Self {
        Self::socket(operation, SocketCode::Timeout)
    }

    pub fn interrupted(operation: &'static str) -> Self {
        Self::socket(operation, SocketCode::Interrupted)
    }

    pub fn not_open(operation: &'static str) -> Self {
        Self::socket(operation, SocketCode::NotOpen)
    }

    /// 替换面向排障人员的消息，错误码保持不变。
    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = message.into();
        self
    }

    pub fn domain(&self) -> ErrorDomain {
        self.domain
    }

    /// 域内数值错误码。
    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }

    /// 产生错误的稳定操作码。
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 判断是否为指定的库级套接字错误码。
    pub fn is_socket(&self, code: SocketCode) -> bool {
        self.domain == ErrorDomain::Socket && self.code == code as i32
    }

    /// 判断是否为指定的 TLS 错误码。
    pub fn is_tls(&self, code: TlsCode) -> bool {
        self.domain == ErrorDomain::Tls && self.code == code as i32
    }
}

impl fmt::Display for SockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}, {}", self.domain, self.code, self.message)
    }
}

impl std::error::Error for SockError {}

impl From<SockError> for io::Error {
    fn from(error: SockError) -> Self {
        io::Error::new(error.kind, error)
    }
}

/// 配置加载与校验错误。
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid stream configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

/// 缓冲区配置错误。
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BufferError {
    /// 缓冲区中仍有未读或未刷出的数据，替换会丢失字节。
    #[error("stream buffer is active: {input} unread and {output} unflushed bytes")]
    Active { input: usize, output: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_domain_code_and_message() {
        let err = SockError::socket("netstream.test", SocketCode::NotOpen);
        assert_eq!(err.to_string(), "socket:4, socket is not open");
    }

    #[test]
    fn os_errors_keep_their_raw_code() {
        let io = io::Error::from_raw_os_error(104);
        let err = SockError::from_io("netstream.test", &io);
        assert_eq!(err.domain(), ErrorDomain::System);
        assert_eq!(err.code(), 104);
    }

    #[test]
    fn kind_only_timeouts_become_timeout_codes() {
        let io = io::Error::from(io::ErrorKind::WouldBlock);
        let err = SockError::from_io("netstream.test", &io);
        assert!(err.is_socket(SocketCode::Timeout));
    }

    #[test]
    fn interrupted_is_not_retryable_for_std_loops() {
        let io: io::Error = SockError::interrupted("netstream.test").into();
        assert_ne!(io.kind(), io::ErrorKind::Interrupted);
    }
}
