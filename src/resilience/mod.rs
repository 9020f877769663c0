//! Bounded client connects.
//!
//! # Data Flow
//! ```text
//! ConnectionRegistry::connect(addr)
//!     → connector.rs (local binding, port scan, attempt loop)
//!     → timeouts.rs (each attempt on its own task, aborted at the deadline)
//!     → retries.rs (attempt count, pause out the rest of a failed attempt)
//! ```
//!
//! # Design Decisions
//! - A connect never waits longer than `timeout × attempts`
//! - A socket produced after its attempt was abandoned is closed, not leaked
//! - An exhausted local port range fails without contacting the remote

pub mod connector;
pub mod retries;
pub mod timeouts;
