//! 阻塞后端上的 TLS：两端均为本后端的往返、`stop_ssl` 的三种结局与握手失败。

use netstream_core::{SessionState, StreamConfig, TlsCode, TlsShutdown};
use netstream_tls::rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use netstream_tls::rustls::{ProtocolVersion, ServerConfig, ServerConnection};
use netstream_transport_tcp::{
    TcpBackend, TcpSocketConfig, TcpSocketStream, TlsParams, TlsVersions, stream_with_config,
};
use rcgen::{CertificateParams, KeyPair};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

struct Identity {
    config: Arc<ServerConfig>,
    cert: CertificateDer<'static>,
}

fn identity() -> Identity {
    let provider = netstream_tls::initialize();
    let params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let key_pair = KeyPair::generate().unwrap();
    let certificate = params.self_signed(&key_pair).unwrap();
    let cert = CertificateDer::from(certificate.der().to_vec());
    let key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.clone()], key.into())
        .unwrap();
    Identity {
        config: Arc::new(config),
        cert,
    }
}

fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();
    (listener, port)
}

fn client(port: &str) -> TcpSocketStream {
    let config = TcpSocketConfig::new()
        .with_stream(StreamConfig::default().with_timeout(Duration::from_secs(5)));
    let mut stream = stream_with_config(config);
    assert!(stream.connect("127.0.0.1", port));
    stream
}

fn trusting(cert: &CertificateDer<'static>) -> TlsParams {
    TlsParams::default()
        .with_root(cert.clone())
        .with_server_name("localhost")
}

/// 由测试直接驱动的 rustls 服务端，用于构造对端的各种关闭方式。
struct RawServer {
    sock: TcpStream,
    conn: ServerConnection,
}

impl RawServer {
    fn accept(listener: &TcpListener, config: Arc<ServerConfig>) -> io::Result<Self> {
        let (mut sock, _) = listener.accept()?;
        sock.set_read_timeout(Some(Duration::from_secs(5)))?;
        let mut conn = ServerConnection::new(config).map_err(io::Error::other)?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock)?;
        }
        Ok(Self { sock, conn })
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        netstream_tls::rustls::Stream::new(&mut self.conn, &mut self.sock).read_exact(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut tls = netstream_tls::rustls::Stream::new(&mut self.conn, &mut self.sock);
        tls.write_all(buf)?;
        tls.flush()
    }

    /// 读取直到收到对端的 `close_notify`。
    fn await_close_notify(&mut self) -> io::Result<()> {
        let mut rest = Vec::new();
        netstream_tls::rustls::Stream::new(&mut self.conn, &mut self.sock).read_to_end(&mut rest)?;
        assert!(rest.is_empty(), "unexpected application data: {rest:?}");
        Ok(())
    }

    fn reply_close_notify(&mut self) -> io::Result<()> {
        self.conn.send_close_notify();
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.sock)?;
        }
        Ok(())
    }

    /// 把 `close_notify` 与紧随其后的明文合并为一次写入。
    fn reply_close_notify_then(&mut self, plaintext: &[u8]) -> io::Result<()> {
        self.conn.send_close_notify();
        let mut wire = Vec::new();
        while self.conn.wants_write() {
            self.conn.write_tls(&mut wire)?;
        }
        wire.extend_from_slice(plaintext);
        self.sock.write_all(&wire)
    }
}

#[test]
fn both_roles_on_the_blocking_backend() {
    let Identity { config, cert } = identity();
    let (listener, port) = bind();
    let server = thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        let backend = TcpBackend::from_std(sock).unwrap();
        let mut stream = TcpSocketStream::new(backend);
        assert!(stream.start_ssl(TlsParams::server(config).with_alpn("netstream")));
        assert!(stream.ssl_started());
        let mut request = [0u8; 5];
        assert_eq!(stream.read_n(&mut request), 5);
        assert_eq!(stream.write_n(&request), 5);
        assert!(stream.sync());
        stream.stop_ssl()
    });

    let mut stream = client(&port);
    assert!(
        stream.start_ssl(
            trusting(&cert)
                .with_alpn("netstream")
                .with_versions(TlsVersions::Tls13Only)
        ),
        "{:?}",
        stream.last_error()
    );
    assert_eq!(stream.state(), SessionState::SslActive);
    assert!(stream.ssl_started());
    assert_eq!(stream.backend().tls_version(), Some(ProtocolVersion::TLSv1_3));
    assert_eq!(stream.backend().alpn_protocol(), Some(b"netstream".to_vec()));

    assert_eq!(stream.write_n(b"hello"), 5);
    let mut echo = [0u8; 5];
    assert_eq!(stream.read_n(&mut echo), 5);
    assert_eq!(&echo, b"hello");

    assert_eq!(stream.stop_ssl(), Some(TlsShutdown::Graceful));
    assert_eq!(server.join().unwrap(), Some(TlsShutdown::Graceful));
    assert_eq!(stream.state(), SessionState::Open);
    assert!(!stream.ssl_started());
}

#[test]
fn graceful_stop_continues_in_plain_text() {
    let Identity { config, cert } = identity();
    let (listener, port) = bind();
    let server = thread::spawn(move || -> io::Result<()> {
        let mut server = RawServer::accept(&listener, config)?;
        let mut ping = [0u8; 4];
        server.read_exact(&mut ping)?;
        assert_eq!(&ping, b"PING");
        server.write_all(b"PONG")?;
        server.await_close_notify()?;
        server.reply_close_notify()?;

        let mut sock = server.sock;
        sock.read_exact(&mut ping)?;
        assert_eq!(&ping, b"PING");
        sock.write_all(b"PONG")
    });

    let mut stream = client(&port);
    assert!(stream.start_ssl(trusting(&cert)));
    assert_eq!(stream.write_n(b"PING"), 4);
    let mut pong = [0u8; 4];
    assert_eq!(stream.read_n(&mut pong), 4);
    assert_eq!(&pong, b"PONG");

    assert_eq!(stream.stop_ssl(), Some(TlsShutdown::Graceful));
    assert!(stream.is_open());
    assert!(!stream.ssl_started());

    assert_eq!(stream.write_n(b"PING"), 4);
    let mut plain = [0u8; 4];
    assert_eq!(stream.read_n(&mut plain), 4);
    assert_eq!(&plain, b"PONG");
    server.join().unwrap().unwrap();
}

#[test]
fn plaintext_in_the_close_notify_write_is_kept() {
    let Identity { config, cert } = identity();
    let (listener, port) = bind();
    let server = thread::spawn(move || -> io::Result<TcpStream> {
        let mut server = RawServer::accept(&listener, config)?;
        server.await_close_notify()?;
        server.reply_close_notify_then(b"PONG")?;
        Ok(server.sock)
    });

    let mut stream = client(&port);
    assert!(stream.start_ssl(trusting(&cert)));
    assert_eq!(stream.stop_ssl(), Some(TlsShutdown::Graceful));
    assert!(stream.is_open());

    let mut plain = [0u8; 4];
    assert_eq!(stream.read_n(&mut plain), 4, "{:?}", stream.last_error());
    assert_eq!(&plain, b"PONG");
    drop(server.join().unwrap().unwrap());
}

#[test]
fn peer_dropping_the_transport_is_not_an_error() {
    let Identity { config, cert } = identity();
    let (listener, port) = bind();
    let server = thread::spawn(move || -> io::Result<()> {
        let mut server = RawServer::accept(&listener, config)?;
        server.await_close_notify()?;
        drop(server);
        Ok(())
    });

    let mut stream = client(&port);
    assert!(stream.start_ssl(trusting(&cert)));
    assert_eq!(stream.stop_ssl(), Some(TlsShutdown::TransportClosed));
    assert_eq!(stream.state(), SessionState::Closed);
    assert!(!stream.is_open());
    assert!(stream.good());
    server.join().unwrap().unwrap();
}

#[test]
fn protocol_violation_during_stop_closes_the_socket() {
    let Identity { config, cert } = identity();
    let (listener, port) = bind();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let server = thread::spawn(move || -> io::Result<()> {
        let mut server = RawServer::accept(&listener, config)?;
        server.await_close_notify()?;
        // 一条无法通过完整性校验的应用数据记录。
        let mut record = vec![0x17, 0x03, 0x03, 0x00, 0x20];
        record.extend_from_slice(&[0xA5; 32]);
        server.sock.write_all(&record)?;
        let _ = done_rx.recv_timeout(Duration::from_secs(10));
        Ok(())
    });

    let mut stream = client(&port);
    assert!(stream.start_ssl(trusting(&cert)));
    assert_eq!(stream.stop_ssl(), None);
    assert!(stream.bad());
    assert_eq!(stream.state(), SessionState::Closed);
    let err = stream.last_error().unwrap();
    assert_eq!(err.domain(), netstream_core::ErrorDomain::Tls);

    done_tx.send(()).unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn failed_handshake_closes_the_socket() {
    let Identity { config, .. } = identity();
    let (listener, port) = bind();
    let server = thread::spawn(move || RawServer::accept(&listener, config).is_err());

    let mut stream = client(&port);
    assert!(!stream.start_ssl(TlsParams::default().with_server_name("localhost")));
    assert_eq!(stream.state(), SessionState::Closed);
    assert!(stream.last_error().unwrap().is_tls(TlsCode::Certificate));
    assert!(stream.peer_port().is_err());
    assert!(server.join().unwrap());
}

#[test]
fn start_ssl_requires_an_open_plain_connection() {
    let Identity { cert, .. } = identity();
    let mut stream = stream_with_config(TcpSocketConfig::new());
    assert!(!stream.start_ssl(trusting(&cert)));
    assert!(stream.last_error().unwrap().is_socket(netstream_core::SocketCode::NotOpen));
    assert_eq!(stream.state(), SessionState::Unopened);

    let (listener, port) = bind();
    stream.reset();
    assert!(stream.connect("127.0.0.1", &port));
    let (_accepted, _) = listener.accept().unwrap();
    assert_eq!(stream.stop_ssl(), None);
    assert!(
        stream
            .last_error()
            .unwrap()
            .is_socket(netstream_core::SocketCode::TlsNotActive)
    );
}
