//! Pluggable socket creation strategies.
//!
//! # Responsibilities
//! - Create client sockets, optionally bound to a local address
//! - Create listening sockets
//! - Resolve factories by configured name at startup
//!
//! # Design Decisions
//! - Factories hold no per-call state and are shared behind `Arc`
//! - Deadlines are not the factory's concern; see `resilience::connector`
//! - Unknown factory names fall back to the plain variant with an error log

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::net::identifier::EndPointIdentifier;
use crate::net::socket::Socket;

/// Name of the plain TCP factories.
pub const PLAIN: &str = "plain";
/// Name of the TLS factories.
pub const TLS: &str = "tls";
/// Name of the HTTP CONNECT tunneling socket factory.
pub const HTTP_PROXY: &str = "http-proxy";

/// Strategy for creating connected client sockets.
#[async_trait]
pub trait SocketFactory: Send + Sync + fmt::Debug {
    /// Connect to `address`.
    async fn create_socket(&self, address: &EndPointIdentifier) -> io::Result<Socket>;

    /// Connect to `address` from the local address `local`.
    ///
    /// A local port already in use must be reported as
    /// [`io::ErrorKind::AddrInUse`] so that port scanning can move on.
    async fn create_bound_socket(
        &self,
        address: &EndPointIdentifier,
        local: SocketAddr,
    ) -> io::Result<Socket>;
}

/// Strategy for creating listening sockets.
#[async_trait]
pub trait ServerSocketFactory: Send + Sync + fmt::Debug {
    /// Listen on `port` (0 picks an ephemeral port), optionally on a specific local IP.
    async fn create_listen_socket(
        &self,
        port: u16,
        backlog: u32,
        local: Option<IpAddr>,
    ) -> io::Result<ListenSocket>;
}

/// Open a TCP connection to `address`, binding to `local` first if given.
pub async fn connect_tcp(
    address: &EndPointIdentifier,
    local: Option<SocketAddr>,
) -> io::Result<TcpStream> {
    let remote = address.resolve().await?;
    match local {
        None => TcpStream::connect(remote).await,
        Some(local) => {
            let socket = if remote.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            socket.bind(match_family(local, remote))?;
            socket.connect(remote).await
        }
    }
}

// A wildcard local address carries no family preference, so follow the remote.
fn match_family(local: SocketAddr, remote: SocketAddr) -> SocketAddr {
    if !local.ip().is_unspecified() || local.is_ipv4() == remote.is_ipv4() {
        return local;
    }
    let ip = if remote.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, local.port())
}

/// Plain TCP client sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainSocketFactory;

#[async_trait]
impl SocketFactory for PlainSocketFactory {
    async fn create_socket(&self, address: &EndPointIdentifier) -> io::Result<Socket> {
        Ok(Socket::Plain(connect_tcp(address, None).await?))
    }

    async fn create_bound_socket(
        &self,
        address: &EndPointIdentifier,
        local: SocketAddr,
    ) -> io::Result<Socket> {
        Ok(Socket::Plain(connect_tcp(address, Some(local)).await?))
    }
}

/// Bind a listening TCP socket.
pub fn bind_listener(port: u16, backlog: u32, local: Option<IpAddr>) -> io::Result<TcpListener> {
    let ip = local.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let addr = SocketAddr::new(ip, port);
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog.max(1))
}

/// Plain TCP listening sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainServerSocketFactory;

#[async_trait]
impl ServerSocketFactory for PlainServerSocketFactory {
    async fn create_listen_socket(
        &self,
        port: u16,
        backlog: u32,
        local: Option<IpAddr>,
    ) -> io::Result<ListenSocket> {
        Ok(ListenSocket::plain(bind_listener(port, backlog, local)?))
    }
}

/// A listening socket, optionally wrapping accepted streams in TLS.
pub struct ListenSocket {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

impl ListenSocket {
    pub fn plain(listener: TcpListener) -> Self {
        Self {
            listener,
            acceptor: None,
        }
    }

    pub fn tls(listener: TcpListener, acceptor: TlsAcceptor) -> Self {
        Self {
            listener,
            acceptor: Some(acceptor),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Accept the next raw TCP stream.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    /// Complete the server-side handshake for an accepted stream (no-op for plain sockets).
    pub async fn secure(&self, stream: TcpStream) -> io::Result<Socket> {
        match &self.acceptor {
            Some(acceptor) => Ok(Socket::TlsServer(Box::new(acceptor.accept(stream).await?))),
            None => Ok(Socket::Plain(stream)),
        }
    }
}

impl fmt::Debug for ListenSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenSocket")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("tls", &self.is_tls())
            .finish()
    }
}

/// Factories registered by name, resolved once at startup.
#[derive(Debug, Clone)]
pub struct FactoryTable {
    socket_factories: HashMap<String, Arc<dyn SocketFactory>>,
    server_socket_factories: HashMap<String, Arc<dyn ServerSocketFactory>>,
}

impl Default for FactoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FactoryTable {
    /// A table holding only the plain factories.
    pub fn new() -> Self {
        let mut table = Self {
            socket_factories: HashMap::new(),
            server_socket_factories: HashMap::new(),
        };
        table.register_socket_factory(PLAIN, Arc::new(PlainSocketFactory));
        table.register_server_socket_factory(PLAIN, Arc::new(PlainServerSocketFactory));
        table
    }

    pub fn register_socket_factory(&mut self, name: &str, factory: Arc<dyn SocketFactory>) {
        self.socket_factories.insert(name.to_string(), factory);
    }

    pub fn register_server_socket_factory(
        &mut self,
        name: &str,
        factory: Arc<dyn ServerSocketFactory>,
    ) {
        self.server_socket_factories.insert(name.to_string(), factory);
    }

    pub fn has_socket_factory(&self, name: &str) -> bool {
        self.socket_factories.contains_key(normalize(name))
    }

    pub fn has_server_socket_factory(&self, name: &str) -> bool {
        self.server_socket_factories.contains_key(normalize(name))
    }

    /// Look up a socket factory. Empty or unknown names yield the plain factory.
    pub fn socket_factory(&self, name: &str) -> Arc<dyn SocketFactory> {
        let name = normalize(name);
        match self.socket_factories.get(name) {
            Some(factory) => factory.clone(),
            None => {
                tracing::error!(factory = name, "Unknown socket factory, using plain");
                Arc::new(PlainSocketFactory)
            }
        }
    }

    /// Look up a server socket factory. Empty or unknown names yield the plain factory.
    pub fn server_socket_factory(&self, name: &str) -> Arc<dyn ServerSocketFactory> {
        let name = normalize(name);
        match self.server_socket_factories.get(name) {
            Some(factory) => factory.clone(),
            None => {
                tracing::error!(factory = name, "Unknown server socket factory, using plain");
                Arc::new(PlainServerSocketFactory)
            }
        }
    }
}

fn normalize(name: &str) -> &str {
    let name = name.trim();
    if name.is_empty() {
        PLAIN
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn plain_factory_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let socket = PlainSocketFactory
            .create_socket(&EndPointIdentifier::from(addr))
            .await
            .unwrap();
        assert_eq!(socket.peer_addr().unwrap(), addr);
    }

    #[test]
    fn wildcard_local_follows_remote_family() {
        let v6_remote: SocketAddr = "[::1]:80".parse().unwrap();
        let v4_remote: SocketAddr = "127.0.0.1:80".parse().unwrap();

        let swapped = match_family("0.0.0.0:40000".parse().unwrap(), v6_remote);
        assert_eq!(swapped, "[::]:40000".parse::<SocketAddr>().unwrap());
        let swapped = match_family("[::]:40000".parse().unwrap(), v4_remote);
        assert_eq!(swapped, "0.0.0.0:40000".parse::<SocketAddr>().unwrap());

        // Explicit addresses are left for the OS to reject.
        let explicit: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        assert_eq!(match_family(explicit, v6_remote), explicit);
        assert_eq!(match_family("0.0.0.0:0".parse().unwrap(), v4_remote).port(), 0);
    }

    #[tokio::test]
    async fn bound_connect_reports_port_in_use() {
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = occupied.local_addr().unwrap();

        let err = PlainSocketFactory
            .create_bound_socket(&EndPointIdentifier::from(remote.local_addr().unwrap()), local)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn plain_listen_socket_accepts() {
        let listen = PlainServerSocketFactory
            .create_listen_socket(0, 16, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)))
            .await
            .unwrap();
        let addr = listen.local_addr().unwrap();
        assert!(!listen.is_tls());

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (stream, _) = listen.accept().await.unwrap();
        let socket = listen.secure(stream).await.unwrap();
        assert!(!socket.is_tls());
        client.await.unwrap();
    }

    #[test]
    fn unknown_names_fall_back_to_plain() {
        let table = FactoryTable::new();
        assert!(table.has_socket_factory(PLAIN));
        assert!(!table.has_socket_factory("made-up"));
        // Debug output names the concrete factory.
        assert_eq!(format!("{:?}", table.socket_factory("")), "PlainSocketFactory");
        assert_eq!(format!("{:?}", table.socket_factory("made-up")), "PlainSocketFactory");
        assert_eq!(
            format!("{:?}", table.server_socket_factory("  ")),
            "PlainServerSocketFactory"
        );
    }
}
