//! TLS context construction and the TLS socket factories.
//!
//! [`TlsContextBuilder`] turns a declarative [`TlsConfig`] into a reusable
//! [`TlsContext`]:
//!
//! ```text
//! protocol        -> protocol versions ("TLS", "TLSv1.2", "TLSv1.3")
//! provider        -> registered custom provider > named provider > default
//! key managers    -> registered custom key ++ key store (PEM chain + key)
//! trust managers  -> registered custom verifier ++ trust store (PEM roots)
//!                    or TrustEverything when the naive flag is set
//! ```
//!
//! Custom providers, keys and verifiers are registered by name up front and
//! referenced from configuration through the `*_class` options.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ResolvesClientCert, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{
    ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig,
    SignatureScheme, SupportedProtocolVersion,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::{StoreConfig, TlsConfig};
use crate::net::factory::{
    bind_listener, connect_tcp, FactoryTable, ListenSocket, ServerSocketFactory, SocketFactory,
};
use crate::net::identifier::EndPointIdentifier;
use crate::net::socket::Socket;

/// TLS configuration errors. All of them are fatal to the component being configured.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("TLS protocol not set")]
    ProtocolNotSet,

    #[error("unsupported TLS protocol {0:?}")]
    UnsupportedProtocol(String),

    #[error("unknown crypto provider {0:?}")]
    UnknownProvider(String),

    #[error("unknown key manager {0:?}")]
    UnknownKeyManager(String),

    #[error("unknown trust manager {0:?}")]
    UnknownTrustManager(String),

    #[error("unsupported store type {0:?} (only \"pem\" is supported)")]
    UnsupportedStoreType(String),

    #[error("failed to load store {path}: {source}")]
    StoreLoad {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("no private key found in key store {0}")]
    NoPrivateKey(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Store-backed manager algorithm names accepted in configuration.
const STORE_ALGORITHMS: &[&str] = &["", "webpki", "pkix", "x509", "sunx509"];

/// Peer certificate verification for both sides of a handshake.
#[derive(Debug, Clone)]
pub struct TrustManager {
    pub server: Arc<dyn ServerCertVerifier>,
    pub client: Arc<dyn ClientCertVerifier>,
}

impl TrustManager {
    pub fn new(server: Arc<dyn ServerCertVerifier>, client: Arc<dyn ClientCertVerifier>) -> Self {
        Self { server, client }
    }

    /// A trust manager that accepts every certificate chain.
    pub fn trust_everything(provider: &CryptoProvider) -> Self {
        let naive = Arc::new(TrustEverything::new(provider));
        Self {
            server: naive.clone(),
            client: naive,
        }
    }

    /// Verify peers against the roots in `roots`.
    fn from_roots(
        roots: RootCertStore,
        provider: &Arc<CryptoProvider>,
        path: &str,
    ) -> Result<Self, TlsError> {
        let roots = Arc::new(roots);
        let invalid = |e: rustls::client::VerifierBuilderError| TlsError::StoreLoad {
            path: path.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
        };
        let server =
            WebPkiServerVerifier::builder_with_provider(roots.clone(), provider.clone())
                .build()
                .map_err(invalid)?;
        let client = WebPkiClientVerifier::builder_with_provider(roots, provider.clone())
            .build()
            .map_err(invalid)?;
        Ok(Self { server, client })
    }
}

/// Verifier that never rejects a peer, whatever it presents.
#[derive(Debug)]
pub struct TrustEverything {
    schemes: Vec<SignatureScheme>,
}

impl TrustEverything {
    pub fn new(provider: &CryptoProvider) -> Self {
        Self {
            schemes: provider
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

impl ServerCertVerifier for TrustEverything {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

impl ClientCertVerifier for TrustEverything {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// Key material offered to peers. The first key wins on both sides.
struct KeyManagers {
    keys: Vec<Arc<CertifiedKey>>,
}

impl fmt::Debug for KeyManagers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManagers")
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl ResolvesServerCert for KeyManagers {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.keys.first().cloned()
    }
}

impl ResolvesClientCert for KeyManagers {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.keys.first().cloned()
    }

    fn has_certs(&self) -> bool {
        !self.keys.is_empty()
    }
}

/// Builds [`TlsContext`]s from configuration.
#[derive(Debug, Clone, Default)]
pub struct TlsContextBuilder {
    providers: HashMap<String, Arc<CryptoProvider>>,
    key_managers: HashMap<String, Arc<CertifiedKey>>,
    trust_managers: HashMap<String, TrustManager>,
}

impl TlsContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `provider` selectable through `provider_class`.
    pub fn register_provider(&mut self, name: &str, provider: CryptoProvider) -> &mut Self {
        self.providers.insert(name.to_string(), Arc::new(provider));
        self
    }

    /// Make `key` selectable through `key_manager_class`.
    pub fn register_key_manager(&mut self, name: &str, key: Arc<CertifiedKey>) -> &mut Self {
        self.key_managers.insert(name.to_string(), key);
        self
    }

    /// Make `trust` selectable through `trust_manager_class`.
    pub fn register_trust_manager(&mut self, name: &str, trust: TrustManager) -> &mut Self {
        self.trust_managers.insert(name.to_string(), trust);
        self
    }

    /// Build a context. Fails if the protocol is unset or any store cannot be loaded.
    pub fn build(&self, config: &TlsConfig) -> Result<TlsContext, TlsError> {
        let versions = protocol_versions(&config.protocol)?;
        let provider = self.resolve_provider(config)?;
        let keys = self.key_managers(config, &provider)?;
        let trust = self.trust_managers(config, &provider)?;

        let client = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&versions)?;
        let client = match trust.first() {
            Some(t) => client
                .dangerous()
                .with_custom_certificate_verifier(t.server.clone()),
            None => {
                tracing::warn!("No trust material configured, TLS clients will reject every server");
                client.with_root_certificates(RootCertStore::empty())
            }
        };
        let client = if keys.is_empty() {
            client.with_no_client_auth()
        } else {
            client.with_client_cert_resolver(Arc::new(KeyManagers { keys: keys.clone() }))
        };

        let server = if keys.is_empty() {
            None
        } else {
            let server = ServerConfig::builder_with_provider(provider.clone())
                .with_protocol_versions(&versions)?;
            let server = match (config.require_client_auth, trust.first()) {
                (true, Some(t)) => server.with_client_cert_verifier(t.client.clone()),
                (true, None) => {
                    tracing::warn!("Client authentication requested without trust material, disabled");
                    server.with_no_client_auth()
                }
                (false, _) => server.with_no_client_auth(),
            };
            Some(Arc::new(
                server.with_cert_resolver(Arc::new(KeyManagers { keys })),
            ))
        };

        tracing::info!(
            protocol = %config.protocol,
            server = server.is_some(),
            naive_trust = config.use_naive_trust_manager,
            "TLS context initialized"
        );

        Ok(TlsContext {
            client: Arc::new(client),
            server,
            server_name: config.server_name.clone().filter(|n| !n.trim().is_empty()),
        })
    }

    fn resolve_provider(&self, config: &TlsConfig) -> Result<Arc<CryptoProvider>, TlsError> {
        let class = config.provider_class.trim();
        if !class.is_empty() {
            return self
                .providers
                .get(class)
                .cloned()
                .ok_or_else(|| TlsError::UnknownProvider(class.to_string()));
        }
        match config.provider_name.trim().to_ascii_lowercase().as_str() {
            "" => Ok(CryptoProvider::get_default()
                .cloned()
                .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))),
            "ring" => Ok(Arc::new(rustls::crypto::ring::default_provider())),
            _ => Err(TlsError::UnknownProvider(config.provider_name.clone())),
        }
    }

    fn key_managers(
        &self,
        config: &TlsConfig,
        provider: &CryptoProvider,
    ) -> Result<Vec<Arc<CertifiedKey>>, TlsError> {
        let mut keys = Vec::new();

        let class = config.key_manager_class.trim();
        if !class.is_empty() {
            let key = self
                .key_managers
                .get(class)
                .ok_or_else(|| TlsError::UnknownKeyManager(class.to_string()))?;
            keys.push(key.clone());
        }

        if let Some(store) = config.key_store.as_ref().filter(|s| !s.path.is_empty()) {
            if !is_store_algorithm(&config.key_manager_algorithm) {
                return Err(TlsError::UnknownKeyManager(
                    config.key_manager_algorithm.clone(),
                ));
            }
            keys.push(Arc::new(load_key_store(store, provider)?));
        }
        Ok(keys)
    }

    fn trust_managers(
        &self,
        config: &TlsConfig,
        provider: &Arc<CryptoProvider>,
    ) -> Result<Vec<TrustManager>, TlsError> {
        if config.use_naive_trust_manager {
            return Ok(vec![TrustManager::trust_everything(provider)]);
        }

        let mut trust = Vec::new();

        let class = config.trust_manager_class.trim();
        if !class.is_empty() {
            let manager = self
                .trust_managers
                .get(class)
                .ok_or_else(|| TlsError::UnknownTrustManager(class.to_string()))?;
            trust.push(manager.clone());
        }

        if let Some(store) = config.trust_store.as_ref().filter(|s| !s.path.is_empty()) {
            if !is_store_algorithm(&config.trust_manager_algorithm) {
                return Err(TlsError::UnknownTrustManager(
                    config.trust_manager_algorithm.clone(),
                ));
            }
            let roots = load_trust_store(store)?;
            trust.push(TrustManager::from_roots(roots, provider, &store.path)?);
        }
        Ok(trust)
    }
}

fn protocol_versions(protocol: &str) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
    match protocol.trim() {
        "" => Err(TlsError::ProtocolNotSet),
        p if p.eq_ignore_ascii_case("TLS") => {
            Ok(vec![&rustls::version::TLS13, &rustls::version::TLS12])
        }
        p if p.eq_ignore_ascii_case("TLSv1.2") => Ok(vec![&rustls::version::TLS12]),
        p if p.eq_ignore_ascii_case("TLSv1.3") => Ok(vec![&rustls::version::TLS13]),
        other => Err(TlsError::UnsupportedProtocol(other.to_string())),
    }
}

fn is_store_algorithm(algorithm: &str) -> bool {
    STORE_ALGORITHMS.contains(&algorithm.trim().to_ascii_lowercase().as_str())
}

fn open_store(store: &StoreConfig) -> Result<BufReader<File>, TlsError> {
    let store_type = store.store_type.trim();
    if !(store_type.is_empty() || store_type.eq_ignore_ascii_case("pem")) {
        return Err(TlsError::UnsupportedStoreType(store_type.to_string()));
    }
    if !store.password.is_empty() {
        tracing::warn!(path = %store.path, "PEM stores are not encrypted, ignoring store password");
    }
    File::open(&store.path)
        .map(BufReader::new)
        .map_err(|source| TlsError::StoreLoad {
            path: store.path.clone(),
            source,
        })
}

fn read_certs(
    reader: &mut BufReader<File>,
    path: &str,
) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    rustls_pemfile::certs(reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::StoreLoad {
            path: path.to_string(),
            source,
        })
}

/// Load a certificate chain and its private key from one PEM file.
pub fn load_key_store(
    store: &StoreConfig,
    provider: &CryptoProvider,
) -> Result<CertifiedKey, TlsError> {
    let certs = read_certs(&mut open_store(store)?, &store.path)?;
    if certs.is_empty() {
        return Err(TlsError::StoreLoad {
            path: store.path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, "no certificates found"),
        });
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut open_store(store)?)
        .map_err(|source| TlsError::StoreLoad {
            path: store.path.clone(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(store.path.clone()))?;

    let signing_key = provider.key_provider.load_private_key(key)?;
    Ok(CertifiedKey::new(certs, signing_key))
}

/// Load trusted root certificates from a PEM file.
pub fn load_trust_store(store: &StoreConfig) -> Result<RootCertStore, TlsError> {
    let certs = read_certs(&mut open_store(store)?, &store.path)?;
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if ignored > 0 {
        tracing::warn!(path = %store.path, ignored, "Skipped unparsable trust store certificates");
    }
    if added == 0 {
        return Err(TlsError::StoreLoad {
            path: store.path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, "no trusted certificates found"),
        });
    }
    Ok(roots)
}

/// An initialized, reusable TLS context.
#[derive(Clone)]
pub struct TlsContext {
    client: Arc<ClientConfig>,
    server: Option<Arc<ServerConfig>>,
    server_name: Option<String>,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("server", &self.server.is_some())
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsContext {
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client.clone()
    }

    /// Server configuration, present only when key material was configured.
    pub fn server_config(&self) -> Option<Arc<ServerConfig>> {
        self.server.clone()
    }

    pub fn socket_factory(&self) -> TlsSocketFactory {
        TlsSocketFactory {
            connector: TlsConnector::from(self.client.clone()),
            server_name: self.server_name.clone(),
        }
    }

    pub fn server_socket_factory(&self) -> Option<TlsServerSocketFactory> {
        self.server.clone().map(|config| TlsServerSocketFactory {
            acceptor: TlsAcceptor::from(config),
        })
    }

    /// Register this context's factories under the "tls" name.
    pub fn register(&self, table: &mut FactoryTable) {
        table.register_socket_factory(crate::net::factory::TLS, Arc::new(self.socket_factory()));
        match self.server_socket_factory() {
            Some(factory) => {
                table.register_server_socket_factory(crate::net::factory::TLS, Arc::new(factory))
            }
            None => tracing::debug!("No key material, TLS server socket factory unavailable"),
        }
    }
}

/// Client sockets secured by a [`TlsContext`].
#[derive(Clone)]
pub struct TlsSocketFactory {
    connector: TlsConnector,
    server_name: Option<String>,
}

impl fmt::Debug for TlsSocketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSocketFactory")
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsSocketFactory {
    async fn handshake(
        &self,
        address: &EndPointIdentifier,
        local: Option<SocketAddr>,
    ) -> io::Result<Socket> {
        let name = self
            .server_name
            .clone()
            .unwrap_or_else(|| address.host().to_string());
        let name = ServerName::try_from(name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let stream = connect_tcp(address, local).await?;
        let tls = self.connector.connect(name, stream).await?;
        Ok(Socket::TlsClient(Box::new(tls)))
    }
}

#[async_trait]
impl SocketFactory for TlsSocketFactory {
    async fn create_socket(&self, address: &EndPointIdentifier) -> io::Result<Socket> {
        self.handshake(address, None).await
    }

    async fn create_bound_socket(
        &self,
        address: &EndPointIdentifier,
        local: SocketAddr,
    ) -> io::Result<Socket> {
        self.handshake(address, Some(local)).await
    }
}

/// Listening sockets whose accepted streams complete a TLS server handshake.
#[derive(Clone)]
pub struct TlsServerSocketFactory {
    acceptor: TlsAcceptor,
}

impl fmt::Debug for TlsServerSocketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TlsServerSocketFactory")
    }
}

#[async_trait]
impl ServerSocketFactory for TlsServerSocketFactory {
    async fn create_listen_socket(
        &self,
        port: u16,
        backlog: u32,
        local: Option<IpAddr>,
    ) -> io::Result<ListenSocket> {
        let listener = bind_listener(port, backlog, local)?;
        Ok(ListenSocket::tls(listener, self.acceptor.clone()))
    }
}
