use rustls::crypto::{CryptoProvider, aws_lc_rs};
use std::sync::{Arc, OnceLock};

static PROVIDER: OnceLock<Arc<CryptoProvider>> = OnceLock::new();

/// 初始化进程级 TLS 加密后端并返回其句柄。
///
/// # 契约说明（What）
/// - 幂等：首次调用选定 AWS-LC 作为 `rustls` 的加密后端，后续调用返回同一个句柄；
/// - 若进程中尚未安装默认后端，顺带将其安装为 `rustls` 的进程默认值，
///   使调用方自行调用 `ServerConfig::builder()` 时不必再次处理后端选择；
/// - 已有其他默认后端时保留对方的选择，本库构建的配置仍显式使用返回的句柄。
///
/// 所有需要 TLS 的入口都会隐式调用本函数，显式调用只用于把初始化提前到进程启动阶段。
pub fn initialize() -> Arc<CryptoProvider> {
    PROVIDER
        .get_or_init(|| {
            let provider = aws_lc_rs::default_provider();
            if CryptoProvider::install_default(provider.clone()).is_err() {
                tracing::debug!("a process-wide rustls crypto provider was already installed");
            }
            Arc::new(provider)
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_is_idempotent() {
        let first = initialize();
        let second = initialize();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(CryptoProvider::get_default().is_some());
    }
}
