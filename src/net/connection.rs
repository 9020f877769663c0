//! Connection state machine and lifecycle tracking.
//!
//! # States
//! ```text
//! Created → Connecting → Connected → LinkEstablished → Disconnected
//!               └──────────────────────────────────────────┘ (connect failure)
//! ```
//!
//! A [`Connection`] wraps exactly one socket and is never reused. The socket
//! is parked inside the connection until the worker serving it takes it out
//! as a [`Link`]. Entering `Disconnected` drops a parked socket right away
//! and wakes every waiter, which is how a serving worker learns to close.

use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::net::identifier::EndPointIdentifier;
use crate::net::socket::Socket;
use crate::registry::group::EndPointGroup;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a connection, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    Created = 0,
    Connecting = 1,
    /// Transport-level socket is open.
    Connected = 2,
    /// Application-level handshake has completed as well.
    LinkEstablished = 3,
    Disconnected = 4,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Created => "created",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::LinkEstablished => "link established",
            ConnectionState::Disconnected => "disconnected",
        }
    }

    /// Socket open, with or without an established link.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::LinkEstablished
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side initiated the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Created by this process through a socket factory.
    Client,
    /// Accepted on one of the listening addresses.
    Server,
}

impl Side {
    pub fn is_client(&self) -> bool {
        matches!(self, Side::Client)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

/// Opaque payload attached by whoever requested the connection.
pub type CustomData = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone)]
struct Registration {
    group: Weak<EndPointGroup>,
    address: EndPointIdentifier,
    sequence: usize,
}

/// One logical connection around a single TCP (optionally TLS) socket.
pub struct Connection {
    id: ConnectionId,
    side: Side,
    identifier: RwLock<Option<EndPointIdentifier>>,
    accept_address: Option<EndPointIdentifier>,
    peer_address: RwLock<Option<SocketAddr>>,
    custom_data: Option<CustomData>,
    state: watch::Sender<ConnectionState>,
    registration: Mutex<Option<Registration>>,
    socket: Mutex<Option<Socket>>,
    socket_usable: AtomicBool,
    read_timeout: Option<Duration>,
    created_at: Instant,
}

impl Connection {
    /// A client-side connection to `address`, not yet connected.
    pub fn client(address: EndPointIdentifier, custom_data: Option<CustomData>) -> Self {
        Self::new(Side::Client, Some(address), None, custom_data)
    }

    /// A server-side connection accepted on `accept_address`.
    ///
    /// It represents its accept address until [`set_identifier`](Self::set_identifier)
    /// says otherwise.
    pub fn server(accept_address: EndPointIdentifier, socket: Socket) -> Self {
        let conn = Self::new(Side::Server, Some(accept_address.clone()), Some(accept_address), None);
        conn.attach_socket(socket);
        conn
    }

    /// A connection with an arbitrary (possibly missing) identifier.
    pub fn new(
        side: Side,
        identifier: Option<EndPointIdentifier>,
        accept_address: Option<EndPointIdentifier>,
        custom_data: Option<CustomData>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Created);
        Self {
            id: ConnectionId::new(),
            side,
            identifier: RwLock::new(identifier),
            accept_address,
            peer_address: RwLock::new(None),
            custom_data,
            state,
            registration: Mutex::new(None),
            socket: Mutex::new(None),
            socket_usable: AtomicBool::new(false),
            read_timeout: None,
            created_at: Instant::now(),
        }
    }

    /// Set the read deadline enforced by [`Link::read`].
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn is_client_side(&self) -> bool {
        self.side.is_client()
    }

    /// The address this connection represents and is grouped under.
    pub fn identifier(&self) -> Option<EndPointIdentifier> {
        read_lock(&self.identifier).clone()
    }

    /// Re-address a server-side connection. Only allowed before the link is established.
    pub fn set_identifier(&self, identifier: EndPointIdentifier) -> bool {
        if self.side.is_client() || self.state() >= ConnectionState::LinkEstablished {
            return false;
        }
        *write_lock(&self.identifier) = Some(identifier);
        true
    }

    /// Local listening address a server-side peer connected to.
    pub fn accept_address(&self) -> Option<&EndPointIdentifier> {
        self.accept_address.as_ref()
    }

    /// Remote socket address, once a socket is attached.
    pub fn peer_address(&self) -> Option<SocketAddr> {
        *read_lock(&self.peer_address)
    }

    pub fn custom_data(&self) -> Option<&CustomData> {
        self.custom_data.as_ref()
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Time since the connection object was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    // --- State ---

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_link_established(&self) -> bool {
        self.state() == ConnectionState::LinkEstablished
    }

    pub fn is_disconnected(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }

    /// Whether the connection is still alive (not yet disconnected).
    pub fn is_active(&self) -> bool {
        !self.is_disconnected()
    }

    /// Advance to `next`. Transitions only move forward; returns `true` if the state changed.
    fn advance(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    pub fn mark_connecting(&self) -> bool {
        self.advance(ConnectionState::Connecting)
    }

    pub fn mark_connected(&self) -> bool {
        self.advance(ConnectionState::Connected)
    }

    pub fn mark_link_established(&self) -> bool {
        if self.state() < ConnectionState::Connected {
            return false;
        }
        self.advance(ConnectionState::LinkEstablished)
    }

    /// Enter the terminal state, dropping a parked socket. Returns `false` if already disconnected.
    pub fn mark_disconnected(&self) -> bool {
        let changed = self.advance(ConnectionState::Disconnected);
        if changed {
            self.socket_usable.store(false, Ordering::Release);
            drop(lock(&self.socket).take());
        }
        changed
    }

    /// Wait until the state satisfies `predicate` or the connection disconnects.
    async fn wait_until(&self, predicate: impl Fn(ConnectionState) -> bool) -> ConnectionState {
        let mut rx = self.state.subscribe();
        let result = rx
            .wait_for(|s| predicate(*s) || *s == ConnectionState::Disconnected)
            .await
            .map(|s| *s);
        // The sender lives in `self`, so the channel cannot close while we borrow it.
        result.unwrap_or(ConnectionState::Disconnected)
    }

    /// Wait for the transport connection, bounded by `timeout` if given.
    pub async fn wait_for_connected(&self, timeout: Option<Duration>) -> bool {
        let wait = self.wait_until(|s| s.is_connected());
        match timeout {
            Some(t) => tokio::time::timeout(t, wait).await.is_ok_and(|s| s.is_connected()),
            None => wait.await.is_connected(),
        }
    }

    /// Wait for link establishment, bounded by `timeout` if given.
    pub async fn wait_for_link_established(&self, timeout: Option<Duration>) -> bool {
        let wait = self.wait_until(|s| s == ConnectionState::LinkEstablished);
        match timeout {
            Some(t) => tokio::time::timeout(t, wait)
                .await
                .is_ok_and(|s| s == ConnectionState::LinkEstablished),
            None => wait.await == ConnectionState::LinkEstablished,
        }
    }

    /// Resolve once the connection has disconnected.
    pub async fn disconnected(&self) {
        self.wait_until(|_| false).await;
    }

    // --- Socket ---

    /// Park `socket` in this connection until a worker takes it.
    pub fn attach_socket(&self, socket: Socket) {
        if let Ok(peer) = socket.peer_addr() {
            *write_lock(&self.peer_address) = Some(peer);
        }
        if self.is_disconnected() {
            return;
        }
        self.socket_usable.store(true, Ordering::Release);
        *lock(&self.socket) = Some(socket);
    }

    pub fn has_socket(&self) -> bool {
        lock(&self.socket).is_some()
    }

    /// Take the parked socket out as a [`Link`].
    pub fn take_link(self: &Arc<Self>) -> Option<Link> {
        let socket = lock(&self.socket).take()?;
        Some(Link {
            connection: self.clone(),
            socket,
        })
    }

    /// Check this connection for errors. `true` means everything is OK.
    pub fn check(&self) -> bool {
        self.is_active() && self.socket_usable.load(Ordering::Acquire)
    }

    // --- Registration ---

    pub(crate) fn set_registration(
        &self,
        group: &Arc<EndPointGroup>,
        address: EndPointIdentifier,
        sequence: usize,
    ) {
        *lock(&self.registration) = Some(Registration {
            group: Arc::downgrade(group),
            address,
            sequence,
        });
    }

    pub(crate) fn clear_registration(&self) -> Option<(EndPointIdentifier, usize)> {
        lock(&self.registration)
            .take()
            .map(|r| (r.address, r.sequence))
    }

    /// Sequence number inside the owning group, while registered.
    pub fn sequence(&self) -> Option<usize> {
        lock(&self.registration).as_ref().map(|r| r.sequence)
    }

    /// The owning group, while registered and alive.
    pub fn group(&self) -> Option<Arc<EndPointGroup>> {
        lock(&self.registration)
            .as_ref()
            .and_then(|r| r.group.upgrade())
    }

    /// Address of the group this connection is filed under, while registered.
    pub fn registered_address(&self) -> Option<EndPointIdentifier> {
        lock(&self.registration).as_ref().map(|r| r.address.clone())
    }

    /// Registry key, `"<group address>[<sequence>]"`, while registered.
    pub fn key(&self) -> Option<String> {
        lock(&self.registration)
            .as_ref()
            .map(|r| connection_key(&r.address, r.sequence))
    }

    /// Human readable summary.
    pub fn description(&self) -> String {
        let address = self
            .identifier()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "<unaddressed>".to_string());
        let mut text = format!("{} side connection {} ({})", self.side.as_str(), address, self.state());
        if let Some(peer) = self.peer_address() {
            text.push_str(&format!(" peer {}", peer));
        }
        if let Some(key) = self.key() {
            text.push_str(&format!(" key {}", key));
        }
        text
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("side", &self.side)
            .field("identifier", &self.identifier())
            .field("state", &self.state())
            .field("key", &self.key())
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Registry key for the connection at `sequence` in the group for `address`.
pub fn connection_key(address: &EndPointIdentifier, sequence: usize) -> String {
    format!("{}[{}]", address, sequence)
}

/// A connection's socket while a worker serves it.
pub struct Link {
    connection: Arc<Connection>,
    socket: Socket,
}

impl Link {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn socket(&mut self) -> &mut Socket {
        &mut self.socket
    }

    /// Read into `buf`, honouring the connection's read timeout.
    ///
    /// End of stream and I/O errors mark the socket unusable for [`Connection::check`].
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = match self.connection.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.socket.read(buf)).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                }
            },
            None => self.socket.read(buf).await,
        };
        if !matches!(&result, Ok(n) if *n > 0) && !buf.is_empty() {
            self.connection.socket_usable.store(false, Ordering::Release);
        }
        result
    }

    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let result = self.socket.write_all(data).await;
        if result.is_err() {
            self.connection.socket_usable.store(false, Ordering::Release);
        }
        result
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.socket.flush().await
    }

    pub fn into_socket(self) -> Socket {
        self.socket
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("connection", &self.connection.id)
            .field("socket", &self.socket)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
