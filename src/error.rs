//! Top-level error type.

use std::io;

use crate::config::ConfigError;
use crate::net::identifier::AddressParseError;
use crate::net::listener::ListenerError;
use crate::net::tls::TlsError;
use crate::registry::pool::PoolClosed;
use crate::resilience::connector::ConnectError;

/// Errors surfaced by the registry and the startup path.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] TlsError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Address(#[from] AddressParseError),

    /// The connection has no address to be grouped under.
    #[error("cannot register connection: {0}")]
    Registration(String),

    #[error("failed to listen on {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: ListenerError,
    },

    #[error(transparent)]
    PoolClosed(#[from] PoolClosed),

    #[error("unknown factory {0:?}")]
    UnknownFactory(String),
}
