use netstream_core::SockError;
use std::io;

/// 描述一次反应器操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const RUNTIME: OperationKind = OperationKind {
    code: "netstream.transport.tokio.runtime_failed",
    message: "tokio runtime",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "netstream.transport.tokio.connect_failed",
    message: "tokio connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "netstream.transport.tokio.read_failed",
    message: "tokio read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "netstream.transport.tokio.write_failed",
    message: "tokio write",
};
pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: "netstream.transport.tokio.shutdown_failed",
    message: "tokio shutdown",
};
pub(crate) const CLOSE: OperationKind = OperationKind {
    code: "netstream.transport.tokio.close_failed",
    message: "tokio close",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "netstream.transport.tokio.configure_failed",
    message: "tokio configure",
};
pub(crate) const ENDPOINT: OperationKind = OperationKind {
    code: "netstream.transport.tokio.endpoint_failed",
    message: "tokio endpoint query",
};
pub(crate) const START_SSL: OperationKind = OperationKind {
    code: "netstream.transport.tokio.start_ssl_failed",
    message: "tokio start_ssl",
};
pub(crate) const STOP_SSL: OperationKind = OperationKind {
    code: "netstream.transport.tokio.stop_ssl_failed",
    message: "tokio stop_ssl",
};

/// 将 IO 错误映射为 [`SockError`]，消息前缀为操作文案。
pub(crate) fn map_io_error(kind: OperationKind, error: &io::Error) -> SockError {
    SockError::from_io(kind.code, error).with_message(format!("{}: {}", kind.message, error))
}
