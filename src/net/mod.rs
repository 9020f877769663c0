//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outgoing:
//!     identifier.rs (host:port)
//!     → factory.rs (named SocketFactory: plain, tls.rs, proxy.rs)
//!     → socket.rs (tuned Socket)
//!     → connection.rs (Connection, parked until a worker takes its Link)
//!
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → factory.rs ListenSocket (optional TLS handshake)
//!     → registry (on_accepted)
//!
//! Connection States:
//!     Created → Connecting → Connected → LinkEstablished → Disconnected
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Factories are looked up by name, never by reflection
//! - TLS is optional and handled transparently

pub mod connection;
pub mod factory;
pub mod identifier;
pub mod listener;
pub mod proxy;
pub mod socket;
pub mod tls;
