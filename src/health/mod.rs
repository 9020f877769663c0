//! Connection health subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (checker.rs)
//!     → Connection::check() (socket still usable)
//!     → ConnectionHandler::check() (application verdict)
//!     → failed while connected: ConnectionRegistry::disconnect
//! ```

pub mod checker;

pub use checker::ConnectionChecker;
