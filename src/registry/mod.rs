//! Connection registry subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound:
//!     get_connection_for_address(addr)
//!     → group round robin (group.rs, slots.rs)
//!     → none found: BoundedConnector → register → worker
//!
//! Inbound:
//!     Acceptor → on_accepted(socket, accept address) → register → worker
//!
//! Worker (pool.rs):
//!     ConnectionHandler::establish_link → LINK_ESTABLISHED
//!     → ConnectionHandler::serve → disconnect → unregister
//! ```
//!
//! # Design Decisions
//! - One registry instance per process, passed around explicitly
//! - Lifecycle notifications reach the group before registry-wide observers
//! - Disconnection is idempotent

pub mod group;
pub mod hooks;
pub mod manager;
pub mod pool;
pub mod slots;

pub use group::EndPointGroup;
pub use hooks::{ConnectionHandler, ConnectionObserver, DefaultHandler};
pub use manager::{ConnectionInfo, ConnectionRegistry, RegistryBuilder};
pub use pool::{PoolClosed, Worker, WorkerGuard, WorkerPool};
