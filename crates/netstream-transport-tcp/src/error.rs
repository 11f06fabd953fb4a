use netstream_core::SockError;
use std::io;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: "netstream.transport.tcp.resolve_failed",
    message: "tcp resolve",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "netstream.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "netstream.transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "netstream.transport.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: "netstream.transport.tcp.shutdown_failed",
    message: "tcp shutdown",
};
pub(crate) const CLOSE: OperationKind = OperationKind {
    code: "netstream.transport.tcp.close_failed",
    message: "tcp close",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "netstream.transport.tcp.configure_failed",
    message: "tcp configure",
};
pub(crate) const ENDPOINT: OperationKind = OperationKind {
    code: "netstream.transport.tcp.endpoint_failed",
    message: "tcp endpoint query",
};
pub(crate) const START_SSL: OperationKind = OperationKind {
    code: "netstream.transport.tcp.start_ssl_failed",
    message: "tcp start_ssl",
};
pub(crate) const STOP_SSL: OperationKind = OperationKind {
    code: "netstream.transport.tcp.stop_ssl_failed",
    message: "tcp stop_ssl",
};

/// 将 IO 错误映射为 [`SockError`]，消息前缀为操作文案。
pub(crate) fn map_io_error(kind: OperationKind, error: &io::Error) -> SockError {
    SockError::from_io(kind.code, error).with_message(format!("{}: {}", kind.message, error))
}
