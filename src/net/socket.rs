//! Connected socket abstraction and per-socket tuning.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::config::SocketConfig;

/// A connected stream, either plain TCP or TLS over TCP.
#[derive(Debug)]
pub enum Socket {
    Plain(TcpStream),
    TlsClient(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    TlsServer(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl Socket {
    /// The underlying TCP stream.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Socket::Plain(s) => s,
            Socket::TlsClient(s) => s.get_ref().0,
            Socket::TlsServer(s) => s.get_ref().0,
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Socket::Plain(_))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().local_addr()
    }
}

impl From<TcpStream> for Socket {
    fn from(stream: TcpStream) -> Self {
        Socket::Plain(stream)
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Socket::TlsClient(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Socket::TlsServer(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Socket::TlsClient(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Socket::TlsServer(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_flush(cx),
            Socket::TlsClient(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Socket::TlsServer(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Socket::TlsClient(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Socket::TlsServer(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Registry-wide socket tuning, applied once when a socket is created or accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    pub receive_buffer_size: usize,
    pub send_buffer_size: usize,
    pub keep_alive: bool,
    pub no_delay: bool,
    /// Read deadline enforced by [`Link::read`](crate::net::connection::Link::read).
    pub read_timeout: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self::from(&SocketConfig::default())
    }
}

impl From<&SocketConfig> for SocketOptions {
    fn from(config: &SocketConfig) -> Self {
        Self {
            receive_buffer_size: config.receive_buffer_size,
            send_buffer_size: config.send_buffer_size,
            keep_alive: config.keep_alive,
            no_delay: config.no_delay,
            read_timeout: (config.read_timeout_ms > 0)
                .then(|| Duration::from_millis(config.read_timeout_ms)),
        }
    }
}

impl SocketOptions {
    /// Apply no-delay, keep-alive and buffer sizes to `stream`.
    ///
    /// Each option is set independently; the returned list names every one
    /// the OS refused.
    pub fn apply(&self, stream: &TcpStream) -> Vec<(&'static str, io::Error)> {
        let sock = socket2::SockRef::from(stream);
        let mut failed = Vec::new();
        if let Err(e) = stream.set_nodelay(self.no_delay) {
            failed.push(("no_delay", e));
        }
        if let Err(e) = sock.set_keepalive(self.keep_alive) {
            failed.push(("keep_alive", e));
        }
        if self.receive_buffer_size > 0 {
            if let Err(e) = sock.set_recv_buffer_size(self.receive_buffer_size) {
                failed.push(("receive_buffer_size", e));
            }
        }
        if self.send_buffer_size > 0 {
            if let Err(e) = sock.set_send_buffer_size(self.send_buffer_size) {
                failed.push(("send_buffer_size", e));
            }
        }
        failed
    }

    /// Like [`apply`](Self::apply), but each failure only produces a warning.
    pub fn apply_or_warn(&self, socket: &Socket, context: &'static str) {
        for (option, e) in self.apply(socket.tcp()) {
            tracing::warn!(error = %e, option, context, "Unable to set socket parameter");
        }
    }
}
