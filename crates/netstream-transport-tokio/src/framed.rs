//! TLS 阶段套在 `TcpStream` 外面的读取适配器。
//!
//! `tokio-rustls` 每次从底层读取都交给 `rustls` 解帧；经 [`RecordFraming`] 截断后，
//! 单次读取不会越过当前记录的末尾。收到 `close_notify` 后 `rustls` 不再请求读取，
//! 对端紧随其后的明文因此留在套接字里，`stop_ssl` 取回的裸连接可以继续读到它。

use netstream_tls::RecordFraming;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

#[derive(Debug)]
pub(crate) struct RecordStream {
    inner: TcpStream,
    framing: RecordFraming,
}

impl RecordStream {
    pub(crate) fn new(inner: TcpStream) -> Self {
        Self {
            inner,
            framing: RecordFraming::default(),
        }
    }

    pub(crate) fn get_ref(&self) -> &TcpStream {
        &self.inner
    }

    pub(crate) fn into_inner(self) -> TcpStream {
        if !self.framing.at_boundary() {
            tracing::debug!("tls stream released in the middle of a record");
        }
        self.inner
    }
}

impl AsyncRead for RecordStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let want = this.framing.next_read_len(buf.remaining());
        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(want));
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        this.framing.consume(limited.filled());
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for RecordStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn reads_stop_at_the_record_end() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let writer = tokio::spawn(async move {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut wire = vec![0x15, 0x03, 0x03, 0x00, 0x02, 0x01, 0x00];
                wire.extend_from_slice(b"PONG");
                sock.write_all(&wire).await.unwrap();
                sock
            });

            let mut framed = RecordStream::new(TcpStream::connect(addr).await.unwrap());
            let _peer = writer.await.unwrap();
            let mut buf = [0u8; 64];
            assert_eq!(framed.read(&mut buf).await.unwrap(), 5);
            assert_eq!(framed.read(&mut buf).await.unwrap(), 2);

            let mut plain = framed.into_inner();
            let mut rest = [0u8; 4];
            plain.read_exact(&mut rest).await.unwrap();
            assert_eq!(&rest, b"PONG");
        });
    }
}
