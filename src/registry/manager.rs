//! The connection registry.
//!
//! # Responsibilities
//! - Own every endpoint group and the flat key → connection map
//! - Create client-side connections through the bounded connector
//! - Adopt server-side sockets handed over by acceptors
//! - Run each connection on a pooled worker: handshake, serve, disconnect
//! - Manage listening addresses and apply reloaded configuration
//!
//! # Locking
//! The group map lock serializes group creation, slot mutation and group
//! destruction; it is never held across `.await`. Registration touches the
//! group first and the flat map second, unregistration the reverse.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::{connection_key, Connection, ConnectionState, CustomData, Link, Side};
use crate::net::factory::{self, FactoryTable, ServerSocketFactory, SocketFactory};
use crate::net::identifier::EndPointIdentifier;
use crate::net::listener::{AcceptSink, Acceptor, ConnectionPermit};
use crate::net::proxy::HttpProxySocketFactory;
use crate::net::socket::{Socket, SocketOptions};
use crate::net::tls::TlsContextBuilder;
use crate::observability::metrics;
use crate::registry::group::EndPointGroup;
use crate::registry::hooks::{ConnectionHandler, ConnectionObserver, DefaultHandler};
use crate::registry::pool::{PoolClosed, WorkerGuard, WorkerPool, DEFAULT_BUFFER_SIZE};
use crate::resilience::connector::BoundedConnector;

/// Settings swapped as a whole on reload.
struct Settings {
    config: TransportConfig,
    connector: BoundedConnector,
    options: SocketOptions,
}

impl Settings {
    fn new(config: TransportConfig, factories: &FactoryTable) -> Self {
        let factory = factories.socket_factory(&config.connect.socket_factory);
        let connector = BoundedConnector::from_config(factory, &config.connect, &config.socket);
        let options = SocketOptions::from(&config.socket);
        Self {
            config,
            connector,
            options,
        }
    }
}

struct ListenerHandle {
    shutdown: Shutdown,
    accept_address: EndPointIdentifier,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    async fn stop(self) {
        self.shutdown.trigger();
        if let Err(e) = self.task.await {
            tracing::debug!(address = %self.accept_address, error = %e, "Acceptor task ended abnormally");
        }
    }
}

/// One row of [`ConnectionRegistry::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub key: String,
    pub address: EndPointIdentifier,
    pub peer: Option<std::net::SocketAddr>,
    pub sequence: usize,
    pub side: Side,
    pub state: ConnectionState,
}

struct Inner {
    groups: Mutex<HashMap<String, Arc<EndPointGroup>>>,
    connections: DashMap<String, Arc<Connection>>,
    settings: ArcSwap<Settings>,
    factories: FactoryTable,
    pool: Arc<WorkerPool>,
    handler: Arc<dyn ConnectionHandler>,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
    link_changed: Notify,
    listeners: Mutex<HashMap<EndPointIdentifier, ListenerHandle>>,
    shutdown: Shutdown,
    closed: AtomicBool,
}

/// Builder for [`ConnectionRegistry`].
pub struct RegistryBuilder {
    config: TransportConfig,
    factories: FactoryTable,
    tls: TlsContextBuilder,
    handler: Arc<dyn ConnectionHandler>,
    observers: Vec<Arc<dyn ConnectionObserver>>,
}

impl RegistryBuilder {
    /// Register a client socket factory under `name`.
    pub fn socket_factory(mut self, name: &str, factory: Arc<dyn SocketFactory>) -> Self {
        self.factories.register_socket_factory(name, factory);
        self
    }

    /// Register a server socket factory under `name`.
    pub fn server_socket_factory(mut self, name: &str, factory: Arc<dyn ServerSocketFactory>) -> Self {
        self.factories.register_server_socket_factory(name, factory);
        self
    }

    /// TLS builder holding custom providers, key managers and trust managers.
    pub fn tls_builder(mut self, tls: TlsContextBuilder) -> Self {
        self.tls = tls;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Resolve the factory table and build the registry.
    pub fn build(self) -> Result<ConnectionRegistry, TransportError> {
        let config = self.config;
        let mut factories = self.factories;

        if !factories.has_socket_factory(factory::HTTP_PROXY) {
            factories.register_socket_factory(
                factory::HTTP_PROXY,
                Arc::new(HttpProxySocketFactory::from_config(&config.proxy)),
            );
        }

        if let Some(tls) = config.tls.as_ref().filter(|t| !t.protocol.trim().is_empty()) {
            let context = self.tls.build(tls)?;
            context.register(&mut factories);
        }

        check_tls_factories(&config, &factories)?;

        let buffer_size = match config.socket.receive_buffer_size {
            0 => DEFAULT_BUFFER_SIZE,
            size => size,
        };
        let pool = Arc::new(WorkerPool::from_config(&config.pool, buffer_size));
        let settings = Settings::new(config, &factories);

        Ok(ConnectionRegistry {
            inner: Arc::new(Inner {
                groups: Mutex::new(HashMap::new()),
                connections: DashMap::new(),
                settings: ArcSwap::from_pointee(settings),
                factories,
                pool,
                handler: self.handler,
                observers: RwLock::new(self.observers),
                link_changed: Notify::new(),
                listeners: Mutex::new(HashMap::new()),
                shutdown: Shutdown::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

fn is_tls(name: &str) -> bool {
    name.trim() == factory::TLS
}

// "tls" is a known name, so asking for it without a usable context is a
// configuration error rather than a silent fallback to plain sockets.
fn check_tls_factories(
    config: &TransportConfig,
    factories: &FactoryTable,
) -> Result<(), TransportError> {
    if is_tls(&config.connect.socket_factory) && !factories.has_socket_factory(factory::TLS) {
        return Err(TransportError::UnknownFactory(factory::TLS.to_string()));
    }
    if is_tls(&config.listener.server_socket_factory)
        && !factories.has_server_socket_factory(factory::TLS)
    {
        return Err(TransportError::UnknownFactory(factory::TLS.to_string()));
    }
    Ok(())
}

/// Owner of every connection and endpoint group in the process.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn builder(config: TransportConfig) -> RegistryBuilder {
        RegistryBuilder {
            config,
            factories: FactoryTable::new(),
            tls: TlsContextBuilder::new(),
            handler: Arc::new(DefaultHandler),
            observers: Vec::new(),
        }
    }

    /// A registry with the default handler and factories.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        Self::builder(config).build()
    }

    fn group_map(&self) -> MutexGuard<'_, HashMap<String, Arc<EndPointGroup>>> {
        self.inner.groups.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<EndPointIdentifier, ListenerHandle>> {
        self.inner.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn observers(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        self.inner
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn settings(&self) -> Arc<Settings> {
        self.inner.settings.load_full()
    }

    /// Current configuration.
    pub fn config(&self) -> TransportConfig {
        self.settings().config.clone()
    }

    pub fn factories(&self) -> &FactoryTable {
        &self.inner.factories
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.inner.pool
    }

    pub fn handler(&self) -> &Arc<dyn ConnectionHandler> {
        &self.inner.handler
    }

    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    // --- Groups and registration ---

    /// The group for `address`, created (marked `side`) if absent.
    pub fn get_or_create_group(&self, address: &EndPointIdentifier, side: Side) -> Arc<EndPointGroup> {
        let mut groups = self.group_map();
        group_entry(&mut groups, address, side)
    }

    /// File `connection` under its identifier. Returns `false` if it has none
    /// or is already disconnected.
    pub fn register_connection(&self, connection: &Arc<Connection>) -> bool {
        let Some(address) = connection.identifier() else {
            tracing::warn!(connection = %connection, "Connection has no address, not registering");
            return false;
        };

        let mut groups = self.group_map();
        // Checked under the lock so a concurrent disconnect either sees the
        // registration or makes us skip it.
        if connection.is_disconnected() {
            tracing::debug!(connection = %connection, "Not registering a disconnected connection");
            return false;
        }
        if connection.key().is_some() {
            return true;
        }
        let group = group_entry(&mut groups, &address, connection.side());
        let sequence = group.add(connection.clone());
        let key = connection_key(&address, sequence);
        self.inner.connections.insert(key.clone(), connection.clone());
        drop(groups);

        metrics::record_registered();
        tracing::debug!(key = %key, side = connection.side().as_str(), "Connection registered");
        true
    }

    /// Remove `connection` from the flat map and its group. Returns `false` if
    /// it was not registered.
    pub fn unregister_connection(&self, connection: &Connection) -> bool {
        let remove_empty = self.settings().config.registry.remove_empty_groups;
        let mut groups = self.group_map();
        let Some((address, sequence)) = connection.clear_registration() else {
            return false;
        };

        let key = connection_key(&address, sequence);
        let id = connection.id();
        self.inner.connections.remove_if(&key, |_, c| c.id() == id);

        let group_key = address.key();
        if let Some(group) = groups.get(&group_key).cloned() {
            group.remove(connection);
            if remove_empty && group.is_empty() {
                groups.remove(&group_key);
                metrics::set_groups(groups.len());
                tracing::debug!(group = %address, "Endpoint group removed");
            }
        }
        drop(groups);

        metrics::record_unregistered();
        tracing::debug!(key = %key, "Connection unregistered");
        true
    }

    // --- Disconnection ---

    /// Close `connection` and unregister it. Safe to call any number of times;
    /// returns `true` only if this call changed something.
    pub fn disconnect(&self, connection: &Arc<Connection>) -> bool {
        let closed = connection.mark_disconnected();
        let unregistered = self.unregister_connection(connection);
        if closed {
            tracing::debug!(connection = %connection, "Connection disconnected");
            for observer in self.observers() {
                observer.disconnected(connection);
            }
        }
        closed || unregistered
    }

    pub fn disconnect_by_key(&self, key: &str) -> bool {
        match self.connection_by_key(key) {
            Some(connection) => self.disconnect(&connection),
            None => false,
        }
    }

    /// Disconnect every connection of the group for `address`. Returns how many were closed.
    pub fn disconnect_group(&self, address: &EndPointIdentifier) -> usize {
        let connections = self.connections_for(address);
        connections.iter().filter(|c| self.disconnect(c)).count()
    }

    /// Disconnect everything, iterating a snapshot of the groups.
    pub fn disconnect_all(&self) -> usize {
        let groups: Vec<_> = self.group_map().values().cloned().collect();
        let mut count = 0;
        for group in groups {
            for connection in group.connections() {
                if self.disconnect(&connection) {
                    count += 1;
                }
            }
        }
        for connection in self.connections() {
            if self.disconnect(&connection) {
                count += 1;
            }
        }
        count
    }

    // --- Client side ---

    /// Next connection to `address` in round-robin order.
    ///
    /// With `create_if_absent`, a missing group triggers a new connection.
    pub async fn get_connection_for_address(
        &self,
        address: &EndPointIdentifier,
        create_if_absent: bool,
    ) -> Result<Option<Arc<Connection>>, TransportError> {
        if let Some(connection) = self.group(address).and_then(|g| g.next()) {
            return Ok(Some(connection));
        }
        if !create_if_absent {
            return Ok(None);
        }
        self.connect(address, None).await.map(Some)
    }

    /// Open a new client-side connection to `address` and start serving it.
    pub async fn connect(
        &self,
        address: &EndPointIdentifier,
        custom_data: Option<CustomData>,
    ) -> Result<Arc<Connection>, TransportError> {
        if self.is_shut_down() {
            return Err(PoolClosed.into());
        }
        let settings = self.settings();
        let connection = Arc::new(
            Connection::client(address.clone(), custom_data)
                .with_read_timeout(settings.options.read_timeout),
        );
        connection.mark_connecting();

        match settings.connector.connect(address).await {
            Ok(socket) => connection.attach_socket(socket),
            Err(e) => {
                connection.mark_disconnected();
                return Err(e.into());
            }
        }

        self.start(connection.clone(), None)?;
        Ok(connection)
    }

    // --- Server side ---

    /// Adopt a socket accepted on `accept_address`.
    ///
    /// Returns `None` if the registry is shut down.
    pub fn on_accepted(&self, socket: Socket, accept_address: EndPointIdentifier) -> Option<Arc<Connection>> {
        self.adopt(socket, accept_address, None)
    }

    fn adopt(
        &self,
        socket: Socket,
        accept_address: EndPointIdentifier,
        permit: Option<ConnectionPermit>,
    ) -> Option<Arc<Connection>> {
        let settings = self.settings();
        settings.options.apply_or_warn(&socket, "accepted");
        let connection = Arc::new(
            Connection::server(accept_address, socket).with_read_timeout(settings.options.read_timeout),
        );
        match self.start(connection.clone(), permit) {
            Ok(()) => Some(connection),
            Err(e) => {
                tracing::debug!(connection = %connection, error = %e, "Rejected accepted connection");
                None
            }
        }
    }

    /// Mark a socket-holding connection connected, register it and hand it to a worker.
    fn start(&self, connection: Arc<Connection>, permit: Option<ConnectionPermit>) -> Result<(), TransportError> {
        if self.is_shut_down() {
            connection.mark_disconnected();
            return Err(PoolClosed.into());
        }
        connection.mark_connected();
        if !self.register_connection(&connection) {
            connection.mark_disconnected();
            return Err(TransportError::Registration(connection.description()));
        }
        metrics::record_connection(connection.side().as_str());
        self.notify_connected(&connection);

        let registry = self.clone();
        tokio::spawn(async move { registry.run_connection(connection, permit).await });
        Ok(())
    }

    /// Worker task for one connection lifetime.
    async fn run_connection(self, connection: Arc<Connection>, permit: Option<ConnectionPermit>) {
        let worker = tokio::select! {
            worker = self.inner.pool.acquire() => worker,
            _ = connection.disconnected() => return,
        };
        let mut worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                tracing::debug!(connection = %connection, error = %e, "No worker available");
                self.disconnect(&connection);
                return;
            }
        };
        let Some(mut link) = connection.take_link() else {
            self.disconnect(&connection);
            return;
        };
        tracing::trace!(worker = worker.id(), connection = %connection, "Worker assigned");

        let handler = self.inner.handler.clone();
        tokio::select! {
            _ = connection.disconnected() => {}
            result = self.drive(handler.as_ref(), &mut link, &mut worker) => {
                if let Err(e) = result {
                    tracing::debug!(connection = %connection, error = %e, "Connection ended with error");
                }
            }
        }

        drop(link);
        self.disconnect(&connection);
        drop(worker);
        drop(permit);
    }

    async fn drive(
        &self,
        handler: &dyn ConnectionHandler,
        link: &mut Link,
        worker: &mut WorkerGuard,
    ) -> io::Result<()> {
        if !handler.establish_link(link).await {
            tracing::warn!(connection = %link.connection(), "Link establishment failed");
            return Ok(());
        }
        self.link_established(link.connection());
        handler.serve(link, worker.buffer_mut()).await
    }

    fn notify_connected(&self, connection: &Arc<Connection>) {
        if let Some(group) = connection.group() {
            group.notify_link_changed();
        }
        self.inner.link_changed.notify_waiters();
        for observer in self.observers() {
            observer.connected(connection);
        }
    }

    fn link_established(&self, connection: &Arc<Connection>) {
        // A server-side handler may have re-addressed the connection.
        if connection.identifier() != connection.registered_address()
            && self.unregister_connection(connection)
            && self.register_connection(connection)
        {
            tracing::debug!(connection = %connection, "Connection re-filed under its announced address");
        }
        if !connection.mark_link_established() {
            return;
        }
        if let Some(group) = connection.group() {
            group.notify_link_changed();
        }
        self.inner.link_changed.notify_waiters();
        tracing::debug!(connection = %connection, "Link established");
        for observer in self.observers() {
            observer.link_established(connection);
        }
    }

    // --- Aggregate state ---

    /// Some registered connection has an open socket.
    pub fn is_connected(&self) -> bool {
        self.inner.connections.iter().any(|e| e.value().is_connected())
    }

    /// Some registered connection has established its link.
    pub fn is_link_established(&self) -> bool {
        self.inner
            .connections
            .iter()
            .any(|e| e.value().is_link_established())
    }

    /// Wait until any connection establishes its link, or `timeout` elapses.
    ///
    /// Returns the final value of [`is_link_established`](Self::is_link_established).
    pub async fn wait_for_link_established(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.inner.link_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_link_established() {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.is_link_established();
                    }
                }
                None => notified.await,
            }
        }
    }

    // --- Queries ---

    pub fn group(&self, address: &EndPointIdentifier) -> Option<Arc<EndPointGroup>> {
        self.group_map().get(&address.key()).cloned()
    }

    pub fn groups(&self) -> Vec<Arc<EndPointGroup>> {
        self.group_map().values().cloned().collect()
    }

    /// Every registered connection.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner
            .connections
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn connections_for(&self, address: &EndPointIdentifier) -> Vec<Arc<Connection>> {
        self.group(address)
            .map(|g| g.connections())
            .unwrap_or_default()
    }

    pub fn connection_by_key(&self, key: &str) -> Option<Arc<Connection>> {
        self.inner.connections.get(key).map(|e| e.value().clone())
    }

    /// Live connections to `address`; `None` if there is no group for it.
    pub fn connection_count(&self, address: &EndPointIdentifier) -> Option<usize> {
        self.group(address).map(|g| g.size())
    }

    pub fn total_connections(&self) -> usize {
        self.inner.connections.len()
    }

    /// Key, peer, sequence and state of every registered connection, sorted by key.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut rows: Vec<ConnectionInfo> = self
            .inner
            .connections
            .iter()
            .filter_map(|e| {
                let connection = e.value();
                Some(ConnectionInfo {
                    key: e.key().clone(),
                    address: connection.registered_address()?,
                    peer: connection.peer_address(),
                    sequence: connection.sequence()?,
                    side: connection.side(),
                    state: connection.state(),
                })
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    // --- Listening addresses ---

    /// Bind the configured listening addresses.
    pub async fn start_listening(&self) -> Result<(), TransportError> {
        let addresses = self.settings().config.listener.parsed_addresses()?;
        self.set_listen_addresses(&addresses).await
    }

    /// Make `addresses` the set of listening addresses: acceptors for removed
    /// addresses are stopped, new ones are bound.
    pub async fn set_listen_addresses(&self, addresses: &[EndPointIdentifier]) -> Result<(), TransportError> {
        if self.is_shut_down() {
            return Err(PoolClosed.into());
        }

        let stale: Vec<ListenerHandle> = {
            let mut listeners = self.listeners();
            let removed: Vec<_> = listeners
                .keys()
                .filter(|a| !addresses.contains(a))
                .cloned()
                .collect();
            removed.iter().filter_map(|a| listeners.remove(a)).collect()
        };
        for handle in stale {
            tracing::info!(address = %handle.accept_address, "Stopping listener");
            handle.stop().await;
        }

        let settings = self.settings();
        let factory = self
            .inner
            .factories
            .server_socket_factory(&settings.config.listener.server_socket_factory);

        for address in addresses {
            if self.listeners().contains_key(address) {
                continue;
            }
            let acceptor = Acceptor::bind(address, factory.as_ref(), &settings.config.listener)
                .await
                .map_err(|source| TransportError::Listen {
                    address: address.to_string(),
                    source,
                })?;
            let handle = self.spawn_acceptor(acceptor);
            if let Some(replaced) = self.listeners().insert(address.clone(), handle) {
                replaced.shutdown.trigger();
            }
        }
        Ok(())
    }

    fn spawn_acceptor(&self, acceptor: Acceptor) -> ListenerHandle {
        let shutdown = Shutdown::new();
        let accept_address = acceptor.accept_address().clone();
        let sink: Arc<dyn AcceptSink> = Arc::new(self.clone());
        let task = tokio::spawn(acceptor.run(sink, shutdown.subscribe()));
        ListenerHandle {
            shutdown,
            accept_address,
            task,
        }
    }

    /// Listening addresses as configured (port 0 stays 0), sorted.
    pub fn listen_addresses(&self) -> Vec<EndPointIdentifier> {
        let mut addresses: Vec<_> = self.listeners().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Accept addresses of the running acceptors, with their bound ports, sorted.
    pub fn bound_addresses(&self) -> Vec<EndPointIdentifier> {
        let mut addresses: Vec<_> = self
            .listeners()
            .values()
            .map(|h| h.accept_address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    // --- Configuration and lifecycle ---

    /// Swap in a reloaded configuration.
    ///
    /// Connect and socket settings affect only sockets created afterwards;
    /// listening addresses are diffed. Pool sizing and TLS material are fixed
    /// at build time.
    pub async fn apply_config(&self, config: TransportConfig) -> Result<(), TransportError> {
        let addresses = config.listener.parsed_addresses()?;
        check_tls_factories(&config, &self.inner.factories)?;
        self.inner
            .settings
            .store(Arc::new(Settings::new(config, &self.inner.factories)));
        tracing::info!("Configuration applied");
        self.set_listen_addresses(&addresses).await
    }

    /// Receiver that fires when [`shutdown`](Self::shutdown) starts.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.inner.shutdown.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop acceptors, disconnect everything, close the worker pool.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Connection registry shutting down");
        self.inner.shutdown.trigger();

        let handles: Vec<ListenerHandle> = self.listeners().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop().await;
        }

        let count = self.disconnect_all();
        self.inner.pool.close();
        tracing::info!(disconnected = count, "Connection registry stopped");
    }
}

impl AcceptSink for ConnectionRegistry {
    fn on_accepted(&self, socket: Socket, accept_address: EndPointIdentifier, permit: ConnectionPermit) {
        self.adopt(socket, accept_address, Some(permit));
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("groups", &self.group_map().len())
            .field("connections", &self.inner.connections.len())
            .field("pool", &self.inner.pool)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn group_entry(
    groups: &mut HashMap<String, Arc<EndPointGroup>>,
    address: &EndPointIdentifier,
    side: Side,
) -> Arc<EndPointGroup> {
    let key = address.key();
    if let Some(group) = groups.get(&key) {
        return group.clone();
    }
    let group = Arc::new(EndPointGroup::new(address.clone(), side));
    groups.insert(key, group.clone());
    metrics::set_groups(groups.len());
    tracing::debug!(group = %address, side = side.as_str(), "Endpoint group created");
    group
}
