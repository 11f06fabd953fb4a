#![doc = r#"
# netstream-tls

## 设计动机（Why）
- 套接字后端需要在一条已打开的明文连接上开启、结束 TLS，并区分“对端回复 close_notify”、
  “对端直接关闭传输”与“关闭交换失败”三种结局；
- 所有后端共享同一套参数、加密后端初始化与错误分类，避免各自解释 `rustls` 错误。

## 核心契约（What）
- [`TlsParams`]：版本选择、SNI 主机名、预构建的客户端/服务端上下文与 ALPN；
  [`TlsParams::resolve`] 得到可直接握手的 [`ResolvedTls`]；
- [`initialize`]：一次性初始化 AWS-LC 加密后端，可重复调用；
- [`TlsSession`]：在任意 [`TimedIo`] 字节通道上驱动握手、读写与 `close_notify` 交换；
- [`RecordFraming`]：把密文读取截断在记录边界上，`close_notify` 之后的明文留在套接字中；
- [`error`]：`rustls`/IO 错误到 `SockError` 的映射与稳定错误码。

## 风险与考量（Trade-offs）
- 默认客户端上下文不内置公共信任锚，证书校验策略交由调用方通过 `roots` 或 `context` 提供。
"#]

pub mod error;
mod framing;
mod init;
mod params;
mod session;

pub use framing::RecordFraming;
pub use init::initialize;
pub use params::{ResolvedTls, TlsParams, TlsRole, TlsVersions};
pub use session::{TimedIo, TlsSession};

pub use rustls;
