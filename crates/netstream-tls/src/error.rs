//! `rustls` 错误到 [`SockError`] 的映射。
//!
//! ## 逻辑（How）
//! - [`OperationKind`] 描述一类 TLS 操作（握手/读/写/刷出/关闭/配置）的稳定错误码与默认文案；
//! - `io_error` 先尝试从 `io::Error` 中取出嵌套的 `rustls::Error`，取不到时按 `ErrorKind` 处理：
//!   `UnexpectedEof` 归为 [`TlsCode::UnexpectedEof`]，其余沿用核心的系统错误映射；
//! - `classify` 把 `rustls::Error` 细分为证书、协议、握手与内部错误。
//!
//! ## 风险与权衡（Trade-offs）
//! - `rustls::Error` 为 `non_exhaustive`，未列出的变体一律视为协议错误。

use netstream_core::{SockError, TlsCode};
use rustls::{AlertDescription, Error as RustlsError};
use std::io;

/// 描述一次 TLS 操作的错误码及默认文案。
#[derive(Clone, Copy, Debug)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const HANDSHAKE: OperationKind = OperationKind {
    code: "netstream.tls.handshake_failed",
    message: "tls handshake",
};

pub const READ: OperationKind = OperationKind {
    code: "netstream.tls.read_failed",
    message: "tls read",
};

pub const WRITE: OperationKind = OperationKind {
    code: "netstream.tls.write_failed",
    message: "tls write",
};

pub const FLUSH: OperationKind = OperationKind {
    code: "netstream.tls.flush_failed",
    message: "tls flush",
};

pub const SHUTDOWN: OperationKind = OperationKind {
    code: "netstream.tls.shutdown_failed",
    message: "tls shutdown",
};

pub const CONFIG: OperationKind = OperationKind {
    code: "netstream.tls.config_invalid",
    message: "tls configuration",
};

/// 映射 `rustls` 直接返回的错误。
pub fn tls_error(kind: OperationKind, error: &RustlsError) -> SockError {
    SockError::tls(kind.code, classify(error), format!("{}: {}", kind.message, error))
}

/// 映射 TLS 读写路径上的 `io::Error`。
pub fn io_error(kind: OperationKind, error: &io::Error) -> SockError {
    if let Some(source) = error.get_ref()
        && let Some(rustls_error) = source.downcast_ref::<RustlsError>()
    {
        return tls_error(kind, rustls_error);
    }
    if error.kind() == io::ErrorKind::UnexpectedEof {
        return SockError::tls(
            kind.code,
            TlsCode::UnexpectedEof,
            format!("{}: peer closed the transport without close_notify", kind.message),
        );
    }
    SockError::from_io(kind.code, error)
}

/// TLS 参数或上下文使用不当。
pub fn config_error(message: impl Into<String>) -> SockError {
    SockError::tls(
        CONFIG.code,
        TlsCode::Config,
        format!("{}: {}", CONFIG.message, message.into()),
    )
}

fn classify(error: &RustlsError) -> TlsCode {
    use RustlsError::*;
    match error {
        NoCertificatesPresented
        | InvalidCertificate(_)
        | InvalidCertRevocationList(_)
        | UnsupportedNameType => TlsCode::Certificate,
        InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidEncryptedClientHello(_)
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | DecryptError
        | EncryptError
        | PeerSentOversizedRecord => TlsCode::Protocol,
        PeerIncompatible(_) | HandshakeNotComplete | NoApplicationProtocol => TlsCode::Handshake,
        FailedToGetCurrentTime
        | FailedToGetRandomBytes
        | BadMaxFragmentSize
        | InconsistentKeys(_)
        | General(_)
        | Other(_) => TlsCode::Internal,
        AlertReceived(alert) => classify_alert(alert),
        _ => TlsCode::Protocol,
    }
}

fn classify_alert(alert: &AlertDescription) -> TlsCode {
    use AlertDescription::*;
    match alert {
        BadCertificate
        | UnsupportedCertificate
        | CertificateRevoked
        | CertificateExpired
        | CertificateUnknown
        | UnknownCA
        | NoCertificate
        | CertificateUnobtainable
        | CertificateRequired
        | AccessDenied => TlsCode::Certificate,
        HandshakeFailure
        | ProtocolVersion
        | InsufficientSecurity
        | InappropriateFallback
        | MissingExtension
        | UnsupportedExtension
        | UnrecognisedName
        | NoApplicationProtocol => TlsCode::Handshake,
        InternalError => TlsCode::Internal,
        _ => TlsCode::Protocol,
    }
}
