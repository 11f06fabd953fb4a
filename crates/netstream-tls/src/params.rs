use crate::error::{config_error, tls_error, CONFIG};
use crate::init::initialize;
use netstream_core::SockError;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{
    ClientConfig, ClientConnection, Connection, RootCertStore, ServerConfig, ServerConnection,
    SupportedProtocolVersion,
};
use std::fmt;
use std::sync::Arc;

static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// 协议版本选择。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsVersions {
    /// 由 `rustls` 协商其支持的最高版本（TLS 1.3 优先，可回落到 TLS 1.2）。
    #[default]
    Any,
    Tls12Only,
    Tls13Only,
}

impl TlsVersions {
    pub fn as_slice(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            TlsVersions::Any => rustls::ALL_VERSIONS,
            TlsVersions::Tls12Only => TLS12_ONLY,
            TlsVersions::Tls13Only => TLS13_ONLY,
        }
    }
}

/// 预先构建的 TLS 上下文，决定本端在握手中的角色。
#[derive(Clone)]
pub enum TlsRole {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

impl fmt::Debug for TlsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsRole::Client(_) => f.write_str("TlsRole::Client(..)"),
            TlsRole::Server(_) => f.write_str("TlsRole::Server(..)"),
        }
    }
}

/// `start_ssl` 的可选参数。
///
/// # 契约说明（What）
/// - `versions`：版本选择，仅作用于未提供 `context` 时构建的默认客户端上下文；
/// - `server_name`：SNI 与证书校验使用的主机名，缺省时取 `connect` 使用的主机；
/// - `context`：调用方预先构建的客户端或服务端上下文，承载证书与信任配置；
/// - `roots`：默认客户端上下文信任的根证书。默认上下文不内置任何公共信任锚，
///   需要校验证书的部署应在此提供根证书或直接提供 `context`；
/// - `alpn`：ALPN 协议列表，非空时覆盖上下文中的设置。
#[derive(Clone, Debug, Default)]
pub struct TlsParams {
    pub versions: TlsVersions,
    pub server_name: Option<String>,
    pub context: Option<TlsRole>,
    pub roots: Vec<CertificateDer<'static>>,
    pub alpn: Vec<Vec<u8>>,
}

impl TlsParams {
    pub fn client(config: Arc<ClientConfig>) -> Self {
        Self {
            context: Some(TlsRole::Client(config)),
            ..Self::default()
        }
    }

    pub fn server(config: Arc<ServerConfig>) -> Self {
        Self {
            context: Some(TlsRole::Server(config)),
            ..Self::default()
        }
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn with_versions(mut self, versions: TlsVersions) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_root(mut self, certificate: CertificateDer<'static>) -> Self {
        self.roots.push(certificate);
        self
    }

    pub fn with_alpn(mut self, protocol: impl Into<Vec<u8>>) -> Self {
        self.alpn.push(protocol.into());
        self
    }

    pub fn is_server(&self) -> bool {
        matches!(self.context, Some(TlsRole::Server(_)))
    }

    /// 结合建连时的主机名，得到可直接用于握手的上下文。
    pub fn resolve(self, host_hint: Option<&str>) -> Result<ResolvedTls, SockError> {
        let TlsParams {
            versions,
            server_name,
            context,
            roots,
            alpn,
        } = self;
        match context {
            Some(TlsRole::Server(config)) => {
                let config = if alpn.is_empty() {
                    config
                } else {
                    let mut owned = (*config).clone();
                    owned.alpn_protocols = alpn;
                    Arc::new(owned)
                };
                Ok(ResolvedTls::Server { config })
            }
            Some(TlsRole::Client(config)) => {
                let server_name = pick_server_name(server_name, host_hint)?;
                let config = if alpn.is_empty() {
                    config
                } else {
                    let mut owned = (*config).clone();
                    owned.alpn_protocols = alpn;
                    Arc::new(owned)
                };
                Ok(ResolvedTls::Client {
                    config,
                    server_name,
                })
            }
            None => {
                let server_name = pick_server_name(server_name, host_hint)?;
                let config = default_client_config(versions, roots, alpn)?;
                Ok(ResolvedTls::Client {
                    config,
                    server_name,
                })
            }
        }
    }
}

fn pick_server_name(
    explicit: Option<String>,
    host_hint: Option<&str>,
) -> Result<ServerName<'static>, SockError> {
    let name = explicit
        .or_else(|| host_hint.map(str::to_owned))
        .ok_or_else(|| config_error("a server name is required for the client handshake"))?;
    ServerName::try_from(name.clone())
        .map_err(|err| config_error(format!("invalid server name {name:?}: {err}")))
}

fn default_client_config(
    versions: TlsVersions,
    roots: Vec<CertificateDer<'static>>,
    alpn: Vec<Vec<u8>>,
) -> Result<Arc<ClientConfig>, SockError> {
    let mut store = RootCertStore::empty();
    for root in roots {
        store.add(root).map_err(|err| tls_error(CONFIG, &err))?;
    }
    let mut config = ClientConfig::builder_with_provider(initialize())
        .with_protocol_versions(versions.as_slice())
        .map_err(|err| tls_error(CONFIG, &err))?
        .with_root_certificates(store)
        .with_no_client_auth();
    config.alpn_protocols = alpn;
    Ok(Arc::new(config))
}

/// 解析完成、可直接握手的 TLS 上下文。
#[derive(Clone)]
pub enum ResolvedTls {
    Client {
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    },
    Server {
        config: Arc<ServerConfig>,
    },
}

impl ResolvedTls {
    /// 创建 `rustls` 连接对象，供阻塞式会话驱动使用。
    pub fn into_connection(self) -> Result<Connection, SockError> {
        match self {
            ResolvedTls::Client {
                config,
                server_name,
            } => ClientConnection::new(config, server_name)
                .map(Connection::from)
                .map_err(|err| tls_error(CONFIG, &err)),
            ResolvedTls::Server { config } => ServerConnection::new(config)
                .map(Connection::from)
                .map_err(|err| tls_error(CONFIG, &err)),
        }
    }
}

impl fmt::Debug for ResolvedTls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedTls::Client { server_name, .. } => f
                .debug_struct("ResolvedTls::Client")
                .field("server_name", server_name)
                .finish(),
            ResolvedTls::Server { .. } => f.write_str("ResolvedTls::Server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netstream_core::TlsCode;

    #[test]
    fn client_needs_a_server_name() {
        let err = TlsParams::default().resolve(None).unwrap_err();
        assert!(err.is_tls(TlsCode::Config));
    }

    #[test]
    fn host_hint_supplies_the_server_name() {
        let resolved = TlsParams::default().resolve(Some("example.com")).unwrap();
        match resolved {
            ResolvedTls::Client { server_name, .. } => {
                assert_eq!(server_name.to_str(), "example.com");
            }
            ResolvedTls::Server { .. } => panic!("expected a client context"),
        }
    }

    #[test]
    fn explicit_server_name_wins_over_the_hint() {
        let resolved = TlsParams::default()
            .with_server_name("api.internal")
            .with_versions(TlsVersions::Tls13Only)
            .with_alpn("h2")
            .resolve(Some("10.0.0.1"))
            .unwrap();
        match resolved {
            ResolvedTls::Client {
                config,
                server_name,
            } => {
                assert_eq!(server_name.to_str(), "api.internal");
                assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
            }
            ResolvedTls::Server { .. } => panic!("expected a client context"),
        }
    }

    #[test]
    fn ip_literals_are_valid_server_names() {
        assert!(TlsParams::default().resolve(Some("127.0.0.1")).is_ok());
    }
}
