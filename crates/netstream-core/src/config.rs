use crate::buffer::DEFAULT_BUFFER_SIZE;
use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// 默认的单次操作超时。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// 套接字流的可配置项。
///
/// # 契约说明（What）
/// - `buffer_size`：输入与输出缓冲区的总字节数，均分为两半；低于 128 字节时回退到默认的 8192；
/// - `self_tie`：读取前是否先刷出待发送数据，默认开启；
/// - `timeout_ms`：单次读写的超时毫秒数，必须大于零。
///
/// 可从 TOML 片段加载，缺省字段取默认值：
///
/// ```
/// use netstream_core::StreamConfig;
///
/// let config = StreamConfig::from_toml_str("buffer_size = 4096\ntimeout_ms = 250").unwrap();
/// assert_eq!(config.buffer_size, 4096);
/// assert!(config.self_tie);
/// assert_eq!(config.timeout().as_millis(), 250);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub buffer_size: usize,
    pub self_tie: bool,
    pub timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            self_tie: true,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl StreamConfig {
    /// 解析并校验 TOML 配置。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: StreamConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_self_tie(mut self, tie: bool) -> Self {
        self.self_tie = tie;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = StreamConfig::from_toml_str("").unwrap();
        assert_eq!(config, StreamConfig::default());
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = StreamConfig::from_toml_str("timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTimeout));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = StreamConfig::from_toml_str("bufer_size = 10").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
