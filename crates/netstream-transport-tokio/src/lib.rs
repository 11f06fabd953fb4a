#![doc = r#"
# netstream-transport-tokio

## 设计动机（Why）
- 已经运行 Tokio 的进程希望复用其反应器，同时保留 `netstream-core` 的阻塞式缓冲流接口；
- 与阻塞后端共享配置、名称解析与 TLS 参数，调用方切换后端时无需改动上层代码。

## 核心契约（What）
- [`TokioBackend`]：实现 [`SocketBackend`](netstream_core::SocketBackend)，
  以 `tokio::net::TcpStream` 与 `tokio-rustls` 完成 IO；
- [`TokioStreambuf`] / [`TokioSocketStream`]：以本后端实例化的缓冲区与流门面。

## 实现策略（How）
- 每个阻塞调用在运行时上 `block_on`，同时等待中断通知与超时；
- 套接字选项通过 `socket2::SockRef` 落地，逻辑与阻塞后端一致。

## 风险与考量（Trade-offs）
- 阻塞调用不得发生在异步任务内部，否则操作以 `ErrorKind::Unsupported` 失败；
  需要在异步代码中使用时应放入 `spawn_blocking`。
"#]

mod backend;
mod error;
mod framed;

pub use backend::TokioBackend;

use netstream_core::{SocketStream, StreamBuf};
use netstream_transport_tcp::TcpSocketConfig;

/// 反应器驱动套接字上的双缓冲区。
pub type TokioStreambuf = StreamBuf<TokioBackend>;

/// 反应器驱动套接字上的流门面。
pub type TokioSocketStream = SocketStream<TokioBackend>;

/// 按配置构造一个尚未连接的流，运行时创建失败时返回错误。
pub fn stream_with_config(config: TcpSocketConfig) -> Result<TokioSocketStream, netstream_core::SockError> {
    let stream = config.stream.clone();
    let backend = TokioBackend::with_config(config)?;
    Ok(SocketStream::with_config(backend, &stream))
}
