#![doc = r#"
# netstream-core

## 设计动机（Why）
- **定位**：提供带超时、可选 TLS 的缓冲套接字流的平台无关部分：
  双缓冲读写核心、错误条件映射与带失败状态位的流门面。
- **架构角色**：具体后端（`netstream-transport-tcp` 的阻塞套接字、
  `netstream-transport-tokio` 的反应器驱动套接字）只需实现
  [`Transport`] 与 [`SocketBackend`]，即可复用本 crate 的全部缓冲语义。

## 核心契约（What）
- [`StreamBuf`]：输入/输出各占一半的固定容量缓冲区，读取前自动刷出（tie），
  大块读写绕过缓冲；刷出失败不丢字节；
- [`SocketStream`]：把 `Result` 翻译为 [`IoState`] 状态位，失败后所有操作为空操作，
  直到 [`SocketStream::reset`]；
- [`SockErrc`]：四值错误条件，`err == SockErrc::Eof` 这类比较与平台错误码无关；
- [`StreamConfig`]：缓冲区大小、自绑定与超时的 TOML 配置。

## 实现策略（How）
- 缓冲区游标集中在 [`BufferArea`]，指针运算不离开 `buffer` 模块；
- 错误统一为可克隆的 [`SockError`]，后端将其作为粘滞的“最后错误”保存；
- 日志仅通过 `tracing` 宏输出，本 crate 从不安装订阅者。

## 风险与考量（Trade-offs）
- 单线程契约：同一流实例只由一个线程驱动，缓冲区不加锁；唯一的跨线程入口是
  [`InterruptHandle`]。
"#]

mod buffer;
mod condition;
mod config;
mod error;
mod stream;
pub mod time;
mod transport;

pub use buffer::{BufferArea, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE, StreamBuf};
pub use condition::SockErrc;
pub use config::{DEFAULT_TIMEOUT, StreamConfig};
pub use error::{BufferError, ConfigError, ErrorDomain, SockError, SocketCode, TlsCode};
pub use stream::{IoState, SocketStream};
pub use transport::{
    Interrupt, InterruptHandle, SessionState, SocketBackend, TlsShutdown, Transport,
};
