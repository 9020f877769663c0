//! Accept loop with backpressure.
//!
//! # Responsibilities
//! - Bind a listening socket through the configured server socket factory
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Complete the TLS handshake off the accept loop
//! - Hand every accepted socket to an [`AcceptSink`] (the registry)

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};

use crate::config::ListenerConfig;
use crate::net::factory::{ListenSocket, ServerSocketFactory};
use crate::net::identifier::EndPointIdentifier;
use crate::net::socket::Socket;

/// Upper bound on a server-side TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept so a broken socket cannot spin the loop.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(io::Error),
    /// Failed to accept connection.
    Accept(io::Error),
    /// Server-side TLS handshake failed or timed out.
    Handshake(io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Handshake(e) => write!(f, "Handshake failed: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Receiver of accepted sockets.
pub trait AcceptSink: Send + Sync + 'static {
    /// Take ownership of a socket accepted on `accept_address`.
    ///
    /// `permit` must be held for as long as the connection lives.
    fn on_accepted(&self, socket: Socket, accept_address: EndPointIdentifier, permit: ConnectionPermit);
}

/// A bounded acceptor for one listening address.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// accepting pauses until a slot becomes available.
pub struct Acceptor {
    socket: ListenSocket,
    /// Configured host with the actually bound port.
    accept_address: EndPointIdentifier,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Acceptor {
    /// Bind `address` with `factory`. Port 0 picks an ephemeral port.
    pub async fn bind(
        address: &EndPointIdentifier,
        factory: &dyn ServerSocketFactory,
        config: &ListenerConfig,
    ) -> Result<Self, ListenerError> {
        let ip = match address.ip() {
            Some(ip) => ip,
            None => address.resolve().await.map_err(ListenerError::Bind)?.ip(),
        };

        let socket = factory
            .create_listen_socket(address.port(), config.backlog, Some(ip))
            .await
            .map_err(ListenerError::Bind)?;

        let local_addr = socket.local_addr().map_err(ListenerError::Bind)?;
        let accept_address = EndPointIdentifier::new(address.host(), local_addr.port());

        tracing::info!(
            address = %accept_address,
            local_addr = %local_addr,
            tls = socket.is_tls(),
            max_connections = config.max_connections,
            "Listener bound"
        );

        let max_connections = config.max_connections.max(1);
        Ok(Self {
            socket,
            accept_address,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    async fn permit(&self) -> Option<ConnectionPermit> {
        let permit = self.connection_limit.clone().acquire_owned().await.ok()?;
        Some(ConnectionPermit { _permit: permit })
    }

    async fn secure(&self, stream: tokio::net::TcpStream) -> Result<Socket, ListenerError> {
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.socket.secure(stream)).await {
            Ok(result) => result.map_err(ListenerError::Handshake),
            Err(_) => Err(ListenerError::Handshake(io::Error::new(
                io::ErrorKind::TimedOut,
                "TLS handshake timed out",
            ))),
        }
    }

    /// Accept until `shutdown` fires, delivering each socket to `sink`.
    ///
    /// Handshakes run on their own tasks so a slow peer cannot stall the loop.
    pub async fn run(self, sink: Arc<dyn AcceptSink>, mut shutdown: broadcast::Receiver<()>) {
        let acceptor = Arc::new(self);
        tracing::info!(address = %acceptor.accept_address, "Acceptor started");

        loop {
            let permit = tokio::select! {
                permit = acceptor.permit() => match permit {
                    Some(permit) => permit,
                    None => break,
                },
                _ = shutdown.recv() => break,
            };

            let (stream, peer) = tokio::select! {
                accepted = acceptor.socket.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        let e = ListenerError::Accept(e);
                        tracing::warn!(address = %acceptor.accept_address, error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                        continue;
                    }
                },
                _ = shutdown.recv() => break,
            };

            let acceptor = acceptor.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                match acceptor.secure(stream).await {
                    Ok(socket) => {
                        tracing::debug!(
                            peer_addr = %peer,
                            address = %acceptor.accept_address,
                            available_permits = acceptor.available_permits(),
                            "Connection accepted"
                        );
                        sink.on_accepted(socket, acceptor.accept_address.clone(), permit);
                    }
                    Err(e) => {
                        tracing::warn!(peer_addr = %peer, error = %e, "Dropping accepted connection");
                    }
                }
            });
        }

        tracing::info!(address = %acceptor.accept_address, "Acceptor stopped");
    }

    /// Get the local address this acceptor is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Address accepted connections are grouped under.
    pub fn accept_address(&self) -> &EndPointIdentifier {
        &self.accept_address
    }

    pub fn is_tls(&self) -> bool {
        self.socket.is_tls()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("accept_address", &self.accept_address)
            .field("socket", &self.socket)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the acceptor.
/// This keeps backpressure intact even if the connection's task panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::factory::PlainServerSocketFactory;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn config(max_connections: usize) -> ListenerConfig {
        ListenerConfig {
            max_connections,
            ..ListenerConfig::default()
        }
    }

    #[tokio::test]
    async fn binds_ephemeral_port_and_reports_it() {
        let address = EndPointIdentifier::new("127.0.0.1", 0);
        let acceptor = Acceptor::bind(&address, &PlainServerSocketFactory, &config(4))
            .await
            .unwrap();
        let port = acceptor.local_addr().unwrap().port();
        assert_ne!(port, 0);
        assert_eq!(acceptor.accept_address(), &EndPointIdentifier::new("127.0.0.1", port));
        assert!(!acceptor.is_tls());
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<(EndPointIdentifier, ConnectionPermit)>>);

    impl AcceptSink for Collect {
        fn on_accepted(&self, _socket: Socket, accept_address: EndPointIdentifier, permit: ConnectionPermit) {
            self.0.lock().unwrap().push((accept_address, permit));
        }
    }

    #[tokio::test]
    async fn run_delivers_until_shutdown() {
        let address = EndPointIdentifier::new("127.0.0.1", 0);
        let acceptor = Acceptor::bind(&address, &PlainServerSocketFactory, &config(8))
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();
        let expected = acceptor.accept_address().clone();

        let sink = Arc::new(Collect::default());
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(acceptor.run(sink.clone(), rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hi").await.unwrap();
        for _ in 0..50 {
            if !sink.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.0.lock().unwrap()[0].0, expected);

        tx.send(()).unwrap();
        task.await.unwrap();
    }

    async fn delivered(sink: &Collect, count: usize, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        while tokio::time::Instant::now() < deadline {
            if sink.0.lock().unwrap().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn held_permits_pause_accepting() {
        let address = EndPointIdentifier::new("127.0.0.1", 0);
        let acceptor = Acceptor::bind(&address, &PlainServerSocketFactory, &config(1))
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();

        let sink = Arc::new(Collect::default());
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(acceptor.run(sink.clone(), rx));

        let _first = TcpStream::connect(addr).await.unwrap();
        assert!(delivered(&sink, 1, Duration::from_secs(5)).await);

        // The only slot is taken, so the second peer waits in the backlog.
        let _second = TcpStream::connect(addr).await.unwrap();
        assert!(!delivered(&sink, 2, Duration::from_millis(100)).await);

        let released = sink.0.lock().unwrap().pop();
        drop(released);
        assert!(delivered(&sink, 1, Duration::from_secs(5)).await);

        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
