//! Uniform byte stream over plaintext TCP or TLS.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

/// An established relay connection.
///
/// The rest of the workspace only sees `AsyncRead + AsyncWrite`; whether the
/// bytes are encrypted is decided once, by the transport factory.
pub enum RelayStream {
    /// Plaintext TCP
    Plain(TcpStream),
    /// TLS over TCP, client or server side
    Tls(Box<TlsStream<TcpStream>>),
}

impl RelayStream {
    /// Whether the stream is TLS-encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(self, RelayStream::Tls(_))
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            RelayStream::Plain(tcp) => tcp,
            RelayStream::Tls(tls) => tls.get_ref().0,
        }
    }

    /// Address of the remote end
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    /// Address of the local end
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().local_addr()
    }
}

impl fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_encrypted() { "tls" } else { "plain" };
        f.debug_struct("RelayStream")
            .field("kind", &kind)
            .field("peer_addr", &self.peer_addr().ok())
            .finish()
    }
}

impl AsyncRead for RelayStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RelayStream::Plain(tcp) => Pin::new(tcp).poll_read(cx, buf),
            RelayStream::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RelayStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            RelayStream::Plain(tcp) => Pin::new(tcp).poll_write(cx, buf),
            RelayStream::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RelayStream::Plain(tcp) => Pin::new(tcp).poll_flush(cx),
            RelayStream::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RelayStream::Plain(tcp) => Pin::new(tcp).poll_shutdown(cx),
            RelayStream::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}
