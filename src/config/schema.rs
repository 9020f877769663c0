//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the transport.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::net::identifier::{AddressParseError, EndPointIdentifier};

/// Root configuration for the TCP transport.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Listening addresses and server socket settings.
    pub listener: ListenerConfig,

    /// Outbound connect settings (timeout, attempts, local binding).
    pub connect: ConnectConfig,

    /// Socket tuning applied to every created or accepted socket.
    pub socket: SocketConfig,

    /// Worker pool sizing.
    pub pool: PoolConfig,

    /// Registry policies.
    pub registry: RegistryConfig,

    /// Optional TLS context settings.
    pub tls: Option<TlsConfig>,

    /// HTTP proxy used by the `http-proxy` socket factory.
    pub proxy: ProxyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Local addresses to accept connections on (e.g., "0.0.0.0:7000").
    pub addresses: Vec<String>,

    /// Listen backlog.
    pub backlog: u32,

    /// Name of the server socket factory ("plain", "tls" or a registered name).
    pub server_socket_factory: String,

    /// Maximum concurrent accepted connections per listener (backpressure).
    pub max_connections: usize,
}

impl ListenerConfig {
    /// The configured listening addresses, parsed.
    pub fn parsed_addresses(&self) -> Result<Vec<EndPointIdentifier>, AddressParseError> {
        self.addresses.iter().map(|a| a.parse()).collect()
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            backlog: 50,
            server_socket_factory: String::new(),
            max_connections: 10_000,
        }
    }
}

/// Outbound connect configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConnectConfig {
    /// Per-attempt connect timeout in milliseconds.
    pub timeout_ms: u64,

    /// Maximum number of connect attempts.
    pub attempts: u32,

    /// Name of the socket factory ("plain", "tls", "http-proxy" or a registered name).
    pub socket_factory: String,

    /// Local address to bind client sockets to.
    pub bind_address: Option<String>,

    /// First local port to try when binding client sockets.
    pub bind_port_begin: Option<u16>,

    /// Last local port to try when binding client sockets.
    pub bind_port_end: Option<u16>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2500,
            attempts: 3,
            socket_factory: String::new(),
            bind_address: None,
            bind_port_begin: None,
            bind_port_end: None,
        }
    }
}

/// Socket tuning configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SocketConfig {
    pub receive_buffer_size: usize,
    pub send_buffer_size: usize,
    pub keep_alive: bool,
    pub no_delay: bool,
    /// Read timeout in milliseconds (0 disables it).
    pub read_timeout_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: 32 * 1024,
            send_buffer_size: 32 * 1024,
            keep_alive: true,
            no_delay: true,
            read_timeout_ms: 0,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of idle workers kept for reuse.
    pub size: usize,

    /// Upper bound on concurrently running workers.
    pub max_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 5,
            max_workers: 10_000,
        }
    }
}

/// Registry policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Destroy endpoint groups once their last connection is gone.
    pub remove_empty_groups: bool,

    /// Interval between connection checks in seconds (0 disables checking).
    pub check_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            remove_empty_groups: true,
            check_interval_secs: 30,
        }
    }
}

/// Key or trust store location.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Store type. Only "pem" is supported; empty means "pem".
    #[serde(rename = "type")]
    pub store_type: String,

    /// Path to the store file.
    pub path: String,

    /// Store password.
    pub password: String,
}

/// TLS context configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TlsConfig {
    /// Protocol name ("TLS", "TLSv1.2", "TLSv1.3"). Empty disables TLS.
    pub protocol: String,

    /// Name of a registered custom crypto provider. Takes precedence over `provider_name`.
    pub provider_class: String,

    /// Name of a built-in crypto provider (e.g., "ring").
    pub provider_name: String,

    pub key_store: Option<StoreConfig>,
    pub key_manager_algorithm: String,
    /// Name of a registered custom certificate resolver.
    pub key_manager_class: String,

    pub trust_store: Option<StoreConfig>,
    pub trust_manager_algorithm: String,
    /// Name of a registered custom certificate verifier.
    pub trust_manager_class: String,

    /// Accept every peer certificate chain. Overrides all other trust settings.
    pub use_naive_trust_manager: bool,

    /// SNI name sent by TLS clients instead of the target host.
    pub server_name: Option<String>,

    /// Require client certificates on TLS listeners.
    pub require_client_auth: bool,
}

/// HTTP proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy host. Empty means connect directly.
    pub host: String,

    pub port: u16,

    /// Value of the `Proxy-Authorization` header, sent verbatim.
    pub authorization: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8080,
            authorization: String::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Emit logs as JSON lines.
    pub log_json: bool,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Address of the Prometheus scrape endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_json: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}
