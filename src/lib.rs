//! Managed TCP transport: grouped client and server connections with
//! bounded connects, pluggable socket factories (plain, TLS, HTTP proxy
//! tunnel) and a pooled per-connection worker model.

pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod resilience;

pub use config::schema::TransportConfig;
pub use error::TransportError;
pub use lifecycle::Shutdown;
pub use net::connection::{Connection, ConnectionState, Link, Side};
pub use net::identifier::EndPointIdentifier;
pub use registry::{ConnectionHandler, ConnectionObserver, ConnectionRegistry, EndPointGroup};
pub use resilience::connector::{BoundedConnector, ConnectError};
