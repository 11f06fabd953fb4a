#![doc = r#"
# netstream-transport-tcp

## 设计动机（Why）
- 为 `netstream-core` 的缓冲流提供阻塞式 BSD 套接字 / WinSock2 后端，
  单次读写的超时由内核计时器负责，超时后会话保持可用；
- 允许其他线程中断阻塞中的读写，调用方无需自行维护监视线程。

## 核心契约（What）
- [`TcpBackend`]：实现 [`SocketBackend`](netstream_core::SocketBackend)，
  支持建连、半关闭、关闭、按需开启/结束 TLS 与端点查询；
- [`TcpStreambuf`] / [`TcpSocketStream`]：以本后端实例化的缓冲区与流门面；
- [`TcpSocketConfig`]：`SO_LINGER`、`TCP_NODELAY`、`SO_KEEPALIVE` 与流配置的 TOML 装载；
- [`resolve`] / [`service_port`]：主机名与服务名解析。

## 实现策略（How）
- 套接字创建与带超时建连经由 `socket2`，套接字选项经由 `socket2::SockRef`；
- TLS 复用 `netstream-tls` 的 [`TlsSession`](netstream_tls::TlsSession)，以 `&TcpStream` 作为字节通道；
- 中断通过句柄复制品上的 `shutdown(Both)` 唤醒阻塞调用，句柄本身只由所属线程释放。

## 风险与考量（Trade-offs）
- 中断与建连存在极短的竞态窗口：请求恰好落在登记句柄之后、发起连接之前时，
  建连会阻塞到超时为止，返回后仍报告为中断。
"#]

mod backend;
mod config;
mod error;
mod resolve;

pub use backend::TcpBackend;
pub use config::TcpSocketConfig;
pub use netstream_tls::{TlsParams, TlsVersions};
pub use resolve::{resolve, service_port};

use netstream_core::{SocketStream, StreamBuf};

/// 阻塞套接字上的双缓冲区。
pub type TcpStreambuf = StreamBuf<TcpBackend>;

/// 阻塞套接字上的流门面。
pub type TcpSocketStream = SocketStream<TcpBackend>;

/// 按配置构造一个尚未连接的流，套接字选项在建连成功后落地。
pub fn stream_with_config(config: TcpSocketConfig) -> TcpSocketStream {
    let stream = config.stream.clone();
    SocketStream::with_config(TcpBackend::with_config(config), &stream)
}
