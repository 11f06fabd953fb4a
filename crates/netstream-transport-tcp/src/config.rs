use netstream_core::{ConfigError, StreamConfig};
use serde::Deserialize;
use socket2::SockRef;
use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// TCP 套接字级配置项，实现对内核行为的显式控制。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把 `SO_LINGER`、`TCP_NODELAY`、`SO_KEEPALIVE` 这类选项集中配置，调用方无需直接操作
///   `socket2` 或平台常量；
/// - 与 [`StreamConfig`] 组合后可整体从 TOML 加载，部署时把套接字策略放在配置文件中。
///
/// ## 核心逻辑（How）
/// - `linger_ms = Some(n)` 通过 `socket2::SockRef::set_linger` 设置 `SO_LINGER`，
///   关闭时 `n` 毫秒内未发完就发送 RST；`None` 遵循内核默认；
/// - 每条新建或接管的连接在进入 `Open` 之前调用 `apply`。
///
/// ## 契约说明（What）
/// - TOML 中套接字选项位于顶层，流配置位于 `[stream]` 表；缺省字段取默认值；
/// - **后置条件**：`apply` 返回 `Ok(())` 时全部选项已落地。
///
/// ## 设计取舍与注意事项（Trade-offs）
/// - `SO_LINGER` 在不同平台的精度不同（Linux 取整到秒）；
/// - 过小的 linger 会丢弃发送缓冲区中的数据并让对端观察到 `ECONNRESET`。
///
/// ```
/// use netstream_transport_tcp::TcpSocketConfig;
///
/// let config = TcpSocketConfig::from_toml_str(
///     "nodelay = true\nlinger_ms = 0\n[stream]\ntimeout_ms = 500\n",
/// )
/// .unwrap();
/// assert!(config.nodelay);
/// assert_eq!(config.linger(), Some(std::time::Duration::ZERO));
/// assert_eq!(config.stream.timeout_ms, 500);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpSocketConfig {
    pub linger_ms: Option<u64>,
    pub nodelay: bool,
    pub keepalive: bool,
    pub stream: StreamConfig,
}

impl TcpSocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: TcpSocketConfig = toml::from_str(source)?;
        config.stream.validate()?;
        Ok(config)
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger_ms = linger.map(|d| d.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger_ms.map(Duration::from_millis)
    }

    /// 落地 `SO_LINGER` 与 `SO_KEEPALIVE`；`TCP_NODELAY` 由调用方通过各自的流类型设置。
    ///
    /// 任何实现了 `AsFd`（Windows 上为 `AsSocket`）的套接字都可以借出 [`SockRef`]，
    /// 因此反应器驱动的后端同样复用这里的选项逻辑。
    pub fn apply_socket_options(&self, sock: SockRef<'_>) -> io::Result<()> {
        if self.linger_ms.is_some() {
            sock.set_linger(self.linger())?;
        }
        if self.keepalive {
            sock.set_keepalive(true)?;
        }
        Ok(())
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        self.apply_socket_options(SockRef::from(stream))?;
        stream.set_nodelay(self.nodelay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_leave_kernel_behaviour_alone() {
        let config = TcpSocketConfig::from_toml_str("").unwrap();
        assert_eq!(config, TcpSocketConfig::default());
        assert_eq!(config.linger(), None);
    }

    #[test]
    fn stream_section_is_validated() {
        let err = TcpSocketConfig::from_toml_str("[stream]\ntimeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTimeout));
    }

    #[test]
    fn apply_sets_linger_on_a_live_socket() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let config = TcpSocketConfig::new()
            .with_linger(Some(Duration::from_secs(1)))
            .with_nodelay(true);
        config.apply(&stream).unwrap();
        assert_eq!(SockRef::from(&stream).linger().unwrap(), Some(Duration::from_secs(1)));
        assert!(stream.nodelay().unwrap());
    }
}
