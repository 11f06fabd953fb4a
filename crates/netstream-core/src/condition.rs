//! 套接字错误条件（`SockErrc`）。
//!
//! 条件不是错误本身，而是作用在任意 [`SockError`] 上的等价谓词，
//! 调用方据此写出与平台无关的分支：`if err == SockErrc::Error { ... }`。
//!
//! | 条件 | 与之等价的错误 |
//! |------|----------------|
//! | `Eof` | 干净的流结束：`recv` 返回 0，或 TLS `close_notify`（zero_return） |
//! | `Timeout` | 单次操作超时，含 `SO_RCVTIMEO` 到期产生的 `WouldBlock` |
//! | `Regular` | 没有错误，或 `Eof` |
//! | `Error` | `Regular` 的补集：任何非 `Eof` 的错误 |
//!
//! `Timeout` 与前三者正交：超时同时满足 `Error`。

use crate::error::{SockError, SocketCode, TlsCode};
use std::io;

/// 四值错误条件。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SockErrc {
    Eof,
    Timeout,
    Regular,
    Error,
}

impl SockErrc {
    /// 判断可选错误是否等价于当前条件，`None` 表示“没有错误码”。
    pub fn matches(self, error: Option<&SockError>) -> bool {
        match self {
            SockErrc::Eof => error.is_some_and(is_eof),
            SockErrc::Timeout => error.is_some_and(is_timeout),
            SockErrc::Regular => error.is_none_or(is_eof),
            SockErrc::Error => error.is_some_and(|err| !is_eof(err)),
        }
    }

    /// 返回最具体的条件：没有错误为 `Regular`，其后依次是 `Eof`、`Timeout`、`Error`。
    pub fn classify(error: Option<&SockError>) -> SockErrc {
        match error {
            None => SockErrc::Regular,
            Some(err) if is_eof(err) => SockErrc::Eof,
            Some(err) if is_timeout(err) => SockErrc::Timeout,
            Some(_) => SockErrc::Error,
        }
    }
}

fn is_eof(error: &SockError) -> bool {
    error.is_socket(SocketCode::Eof) || error.is_tls(TlsCode::ZeroReturn)
}

fn is_timeout(error: &SockError) -> bool {
    error.is_socket(SocketCode::Timeout)
        || matches!(
            error.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        )
}

impl PartialEq<SockErrc> for SockError {
    fn eq(&self, condition: &SockErrc) -> bool {
        condition.matches(Some(self))
    }
}

impl PartialEq<SockError> for SockErrc {
    fn eq(&self, error: &SockError) -> bool {
        self.matches(Some(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OP: &str = "netstream.test";

    #[test]
    fn none_is_regular_only() {
        assert!(SockErrc::Regular.matches(None));
        assert!(!SockErrc::Error.matches(None));
        assert!(!SockErrc::Eof.matches(None));
        assert!(!SockErrc::Timeout.matches(None));
        assert_eq!(SockErrc::classify(None), SockErrc::Regular);
    }

    #[test]
    fn tls_zero_return_is_eof() {
        let err = SockError::tls(OP, TlsCode::ZeroReturn, "close_notify received");
        assert!(err == SockErrc::Eof);
        assert!(err == SockErrc::Regular);
        assert!(err != SockErrc::Error);
    }

    #[test]
    fn abrupt_tls_termination_is_an_error() {
        let err = SockError::tls(OP, TlsCode::UnexpectedEof, "peer closed without close_notify");
        assert!(err == SockErrc::Error);
        assert!(err != SockErrc::Eof);
    }

    #[test]
    fn timeout_is_also_an_error() {
        let err = SockError::timeout(OP);
        assert!(err == SockErrc::Timeout);
        assert!(err == SockErrc::Error);
        assert_eq!(SockErrc::classify(Some(&err)), SockErrc::Timeout);
    }
}
