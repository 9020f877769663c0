//! Extension points for applications built on the registry.
//!
//! A [`ConnectionHandler`] drives the bytes of one connection; a
//! [`ConnectionObserver`] is told about lifecycle changes after the registry
//! has finished its own bookkeeping.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;

use crate::net::connection::{Connection, Link};

/// Application protocol running on top of each connection.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + std::fmt::Debug {
    /// Perform the application handshake. Returning `true` moves the
    /// connection to link established; `false` disconnects it.
    ///
    /// Server-side handlers may call [`Connection::set_identifier`] here to
    /// re-file the connection under the address the peer announced.
    async fn establish_link(&self, _link: &mut Link) -> bool {
        true
    }

    /// Serve the established link until the peer goes away.
    ///
    /// The default discards everything it reads until EOF.
    async fn serve(&self, link: &mut Link, buffer: &mut [u8]) -> io::Result<()> {
        loop {
            if link.read(buffer).await? == 0 {
                return Ok(());
            }
        }
    }

    /// Application-level health check, consulted by the periodic checker.
    fn check(&self, _connection: &Connection) -> bool {
        true
    }
}

/// Handler that establishes links immediately and idles until EOF.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl ConnectionHandler for DefaultHandler {}

/// Lifecycle callbacks. They run on the task that detected the event and
/// must return quickly.
pub trait ConnectionObserver: Send + Sync {
    fn connected(&self, _connection: &Arc<Connection>) {}

    fn link_established(&self, _connection: &Arc<Connection>) {}

    fn disconnected(&self, _connection: &Arc<Connection>) {}
}
