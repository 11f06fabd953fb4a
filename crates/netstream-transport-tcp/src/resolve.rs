//! 主机名与服务名解析。
//!
//! IP 字面量配合数字端口直接构造地址；其余情况交给系统的 `getaddrinfo`
//! （`dns-lookup`），服务名查询系统服务数据库，返回顺序保持系统解析器的顺序。

use crate::error::RESOLVE;
use dns_lookup::{AddrInfoHints, SockType};
use netstream_core::{SockError, SocketCode};
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

/// 系统缺少服务数据库（例如精简容器镜像没有 `/etc/services`）时仍能识别的常见 TCP 服务。
const FALLBACK_SERVICES: &[(&str, u16)] = &[
    ("ftp", 21),
    ("ssh", 22),
    ("smtp", 25),
    ("http", 80),
    ("pop3", 110),
    ("imap", 143),
    ("https", 443),
    ("imaps", 993),
    ("pop3s", 995),
];

fn stream_hints() -> AddrInfoHints {
    AddrInfoHints {
        socktype: SockType::Stream.into(),
        ..AddrInfoHints::default()
    }
}

fn resolve_failed(detail: impl fmt::Display) -> SockError {
    SockError::socket(RESOLVE.code, SocketCode::ResolveFailed)
        .with_message(format!("{}: {detail}", RESOLVE.message))
}

/// 在系统服务数据库中查询 TCP 服务名；不指定主机时 `getaddrinfo` 不访问 DNS。
fn lookup_service(service: &str) -> Option<u16> {
    let entries = dns_lookup::getaddrinfo(None, Some(service), Some(stream_hints())).ok()?;
    entries
        .filter_map(Result::ok)
        .map(|info| info.sockaddr.port())
        .next()
}

/// 把服务名或十进制端口号解析为端口。
pub fn service_port(service: &str) -> Option<u16> {
    let service = service.trim();
    if service.is_empty() {
        return None;
    }
    if service.bytes().all(|b| b.is_ascii_digit()) {
        return service.parse().ok();
    }
    lookup_service(service).or_else(|| {
        FALLBACK_SERVICES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(service))
            .map(|&(_, port)| port)
    })
}

/// 解析 `host` + `service` 为候选地址列表，顺序与系统解析器一致。
///
/// `host` 可以是主机名、IPv4 字面量或（可带方括号的）IPv6 字面量。
pub fn resolve(host: &str, service: &str) -> Result<Vec<SocketAddr>, SockError> {
    let port = service_port(service)
        .ok_or_else(|| resolve_failed(format_args!("unknown service {service:?}")))?;
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(resolve_failed("empty host"));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let port_text = port.to_string();
    let addrs = dns_lookup::getaddrinfo(Some(host), Some(&port_text), Some(stream_hints()))
        .map_err(|err| resolve_failed(io::Error::from(err)))?
        .map(|entry| entry.map(|info| info.sockaddr))
        .collect::<io::Result<Vec<SocketAddr>>>()
        .map_err(resolve_failed)?;
    if addrs.is_empty() {
        return Err(resolve_failed(format_args!("no addresses for {host:?}")));
    }
    tracing::trace!(host, port, candidates = addrs.len(), "resolved host");
    Ok(addrs)
}
