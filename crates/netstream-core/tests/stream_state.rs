//! 流门面的失败状态语义。

use netstream_core::{
    Interrupt, InterruptHandle, IoState, SessionState, SockError, SocketBackend, SocketCode,
    SocketStream, TlsShutdown, Transport,
};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_test::traced_test;

#[derive(Default)]
struct Flag(AtomicBool);

impl Interrupt for Flag {
    fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_pending(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 按脚本回放读结果的后端。
struct ScriptedBackend {
    state: SessionState,
    reads: VecDeque<Result<Vec<u8>, SockError>>,
    written: Vec<u8>,
    write_error: Option<SockError>,
    stop_result: Option<Result<TlsShutdown, SockError>>,
    close_error: Option<SockError>,
    last_error: Option<SockError>,
    timeout: Duration,
    flag: Arc<Flag>,
    closes: usize,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            state: SessionState::Unopened,
            reads: VecDeque::new(),
            written: Vec::new(),
            write_error: None,
            stop_result: None,
            close_error: None,
            last_error: None,
            timeout: Duration::from_secs(10),
            flag: Arc::default(),
            closes: 0,
        }
    }
}

impl ScriptedBackend {
    fn open() -> Self {
        Self {
            state: SessionState::Open,
            ..Self::default()
        }
    }

    fn fail(&mut self, err: SockError) -> SockError {
        self.last_error = Some(err.clone());
        err
    }
}

impl Transport for ScriptedBackend {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, SockError> {
        if !self.state.is_open() {
            return Err(self.fail(SockError::not_open("netstream.test.read")));
        }
        match self.reads.pop_front() {
            Some(Ok(bytes)) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Some(Err(err)) => Err(self.fail(err)),
            None => Err(self.fail(SockError::eof("netstream.test.read"))),
        }
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize, SockError> {
        if let Some(err) = self.write_error.clone() {
            return Err(self.fail(err));
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl SocketBackend for ScriptedBackend {
    type TlsParams = ();

    fn state(&self) -> SessionState {
        self.state
    }

    fn connect(&mut self, host: &str, _service: &str) -> Result<(), SockError> {
        if host == "unreachable" {
            self.state = SessionState::Errored;
            return Err(self.fail(SockError::socket("netstream.test.connect", SocketCode::ResolveFailed)));
        }
        self.state = SessionState::Open;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), SockError> {
        self.state = SessionState::ShuttingDown;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SockError> {
        self.closes += 1;
        self.state = SessionState::Closed;
        match self.close_error.take() {
            Some(err) => Err(self.fail(err)),
            None => Ok(()),
        }
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle::new(self.flag.clone())
    }

    fn start_ssl(&mut self, _params: ()) -> Result<(), SockError> {
        self.state = SessionState::SslActive;
        Ok(())
    }

    fn stop_ssl(&mut self) -> Result<TlsShutdown, SockError> {
        match self.stop_result.take() {
            Some(Err(err)) => {
                self.state = SessionState::Closed;
                Err(self.fail(err))
            }
            Some(Ok(outcome)) => Ok(outcome),
            None => {
                self.state = SessionState::Open;
                Ok(TlsShutdown::Graceful)
            }
        }
    }

    fn ssl_started(&self) -> bool {
        self.state == SessionState::SslActive
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Duration {
        std::mem::replace(&mut self.timeout, timeout)
    }

    fn peer_endpoint(&self) -> Result<SocketAddr, SockError> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 4040)))
    }

    fn sock_endpoint(&self) -> Result<SocketAddr, SockError> {
        Err(SockError::not_open("netstream.test.sock_endpoint"))
    }

    fn last_error(&self) -> Option<&SockError> {
        self.last_error.as_ref()
    }

    fn clear_last_error(&mut self) {
        self.last_error = None;
    }
}

#[test]
fn failed_connect_sets_fail_without_bad() {
    let mut stream = SocketStream::new(ScriptedBackend::default());
    assert!(!stream.connect("unreachable", "80"));
    assert_eq!(stream.rdstate(), IoState::FAIL);
    assert!(stream.fail());
    assert!(!stream.bad());
    assert_eq!(stream.state(), SessionState::Errored);
    assert!(stream.last_error().is_some());
}

#[test]
fn operations_are_no_ops_once_failed() {
    let mut stream = SocketStream::new(ScriptedBackend::default());
    assert!(!stream.connect("unreachable", "80"));
    assert!(!stream.connect("localhost", "80"));
    assert_eq!(stream.state(), SessionState::Errored);
    assert!(!stream.start_ssl(()));
    assert!(stream.stop_ssl().is_none());
    assert!(!stream.shutdown());
    assert!(!stream.close());
    assert_eq!(stream.backend().closes, 0);
    assert_eq!(stream.write_n(b"dropped"), 0);
    assert!(stream.write(b"dropped").is_err());
}

#[test]
fn reset_closes_and_clears_every_bit() {
    let mut stream = SocketStream::new(ScriptedBackend::default());
    assert!(!stream.connect("unreachable", "80"));
    stream.reset();
    assert!(stream.good());
    assert_eq!(stream.state(), SessionState::Closed);
    assert!(stream.last_error().is_none());
    assert!(stream.connect("localhost", "80"));
    assert!(stream.is_open());
}

#[test]
fn read_timeout_sets_fail_and_keeps_the_session() {
    let mut backend = ScriptedBackend::open();
    backend.reads.push_back(Err(SockError::timeout("netstream.test.read")));
    let mut stream = SocketStream::new(backend);
    let mut buf = [0u8; 4];
    assert_eq!(stream.read_n(&mut buf), 0);
    assert_eq!(stream.rdstate(), IoState::FAIL);
    assert!(stream.is_open());

    stream.clear();
    stream.streambuf_mut().get_mut().reads.push_back(Ok(b"data".to_vec()));
    assert_eq!(stream.read_n(&mut buf), 4);
    assert_eq!(&buf, b"data");
    assert!(stream.good());
}

#[test]
fn hard_read_error_sets_bad() {
    let mut backend = ScriptedBackend::open();
    let reset = io::Error::from(io::ErrorKind::ConnectionReset);
    backend.reads.push_back(Err(SockError::from_io("netstream.test.read", &reset)));
    let mut stream = SocketStream::new(backend);
    let mut buf = [0u8; 4];
    assert!(stream.read(&mut buf).is_err());
    assert!(stream.bad());
    assert!(stream.read(&mut buf).is_err());
}

#[test]
fn short_read_at_end_of_stream_sets_eof() {
    let mut backend = ScriptedBackend::open();
    backend.reads.push_back(Ok(b"ab".to_vec()));
    let mut stream = SocketStream::new(backend);
    let mut buf = [0u8; 4];
    assert_eq!(stream.read_n(&mut buf), 2);
    assert!(stream.eof());
    assert!(stream.fail());
    assert!(!stream.bad());
}

#[test]
fn io_read_end_of_stream_sets_eof_only() {
    let mut stream = SocketStream::new(ScriptedBackend::open());
    let mut text = String::new();
    assert_eq!(stream.read_to_string(&mut text).unwrap(), 0);
    assert!(stream.eof());
    assert!(!stream.fail());
}

#[test]
fn formatted_output_reaches_the_backend_on_flush() {
    let mut stream = SocketStream::new(ScriptedBackend::open());
    write!(stream, "GET {} HTTP/1.0\r\n\r\n", "/").unwrap();
    assert!(stream.backend().written.is_empty());
    stream.flush().unwrap();
    assert_eq!(stream.backend().written, b"GET / HTTP/1.0\r\n\r\n");
}

#[test]
fn failed_sync_marks_the_stream_bad() {
    let mut backend = ScriptedBackend::open();
    let broken = io::Error::from(io::ErrorKind::BrokenPipe);
    backend.write_error = Some(SockError::from_io("netstream.test.write", &broken));
    let mut stream = SocketStream::new(backend);
    assert_eq!(stream.write_n(b"abc"), 3);
    assert!(!stream.sync());
    assert!(stream.bad());
    assert_eq!(stream.streambuf().pending_output(), 3);
}

#[test]
#[traced_test]
fn stop_ssl_failure_reports_none_and_closes() {
    let mut backend = ScriptedBackend::open();
    backend.stop_result = Some(Err(SockError::timeout("netstream.test.stop_ssl")));
    let mut stream = SocketStream::new(backend);
    assert!(stream.start_ssl(()));
    assert!(stream.ssl_started());
    assert!(stream.stop_ssl().is_none());
    assert!(stream.bad());
    assert!(!stream.is_open());
    assert!(logs_contain("stream entered failed state"));
}

#[test]
#[traced_test]
fn stop_ssl_logs_close_error_after_failed_flush() {
    let mut backend = ScriptedBackend::open();
    let broken = io::Error::from(io::ErrorKind::BrokenPipe);
    backend.write_error = Some(SockError::from_io("netstream.test.write", &broken));
    backend.close_error = Some(SockError::from_io("netstream.test.close", &broken));
    let mut stream = SocketStream::new(backend);
    assert!(stream.start_ssl(()));
    assert_eq!(stream.write_n(b"tail"), 4);
    assert!(stream.stop_ssl().is_none());
    assert!(stream.bad());
    assert!(!stream.is_open());
    assert!(stream.backend().closes >= 1);
    assert!(logs_contain("close after failed tls flush reported an error"));
}

#[test]
fn graceful_stop_ssl_keeps_the_connection() {
    let mut stream = SocketStream::new(ScriptedBackend::open());
    assert!(stream.start_ssl(()));
    assert_eq!(stream.stop_ssl(), Some(TlsShutdown::Graceful));
    assert!(stream.is_open());
    assert!(stream.good());
}

#[test]
fn endpoint_queries_report_errors() {
    let stream = SocketStream::new(ScriptedBackend::open());
    assert_eq!(stream.peer_address().unwrap(), "127.0.0.1");
    assert_eq!(stream.peer_port().unwrap(), 4040);
    assert!(stream.sock_address().is_err());
}

#[test]
fn interrupt_handle_is_shared_with_the_backend() {
    let stream = SocketStream::new(ScriptedBackend::open());
    let handle = stream.interrupt_handle();
    std::thread::spawn(move || handle.interrupt())
        .join()
        .unwrap();
    assert!(stream.interrupt_handle().is_pending());
}

#[test]
fn moved_stream_keeps_its_state() {
    let mut stream = SocketStream::new(ScriptedBackend::default());
    assert!(!stream.connect("unreachable", "80"));
    let moved = stream;
    assert!(moved.fail());
}
