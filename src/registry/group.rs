//! Endpoint groups: all live connections sharing one address.
//!
//! # Responsibilities
//! - Keep connections in a tombstoned slot list (stable sequence numbers)
//! - Round-robin selection for outbound traffic
//! - Aggregate "connected" / "link established" queries and waits
//!
//! Slot mutation is crate-private; the registry performs it while holding
//! its group map lock so that group creation and destruction never race.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::net::connection::{Connection, Side};
use crate::net::identifier::EndPointIdentifier;
use crate::registry::slots::SlotList;

/// The connections sharing one remote (client side) or accepting (server side) address.
pub struct EndPointGroup {
    address: EndPointIdentifier,
    side: Side,
    accept_address: Option<EndPointIdentifier>,
    slots: Mutex<SlotList<Arc<Connection>>>,
    link_changed: Notify,
}

impl EndPointGroup {
    pub fn new(address: EndPointIdentifier, side: Side) -> Self {
        let accept_address = (!side.is_client()).then(|| address.clone());
        Self {
            address,
            side,
            accept_address,
            slots: Mutex::new(SlotList::new()),
            link_changed: Notify::new(),
        }
    }

    pub fn address(&self) -> &EndPointIdentifier {
        &self.address
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn is_client_side(&self) -> bool {
        self.side.is_client()
    }

    /// Address server-side peers connected to. `None` for client-side groups.
    pub fn accept_address(&self) -> Option<&EndPointIdentifier> {
        self.accept_address.as_ref()
    }

    fn slots(&self) -> MutexGuard<'_, SlotList<Arc<Connection>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// File `connection` into the first free slot; returns its sequence number.
    pub(crate) fn add(self: &Arc<Self>, connection: Arc<Connection>) -> usize {
        let mut slots = self.slots();
        let sequence = slots.insert(connection.clone());
        connection.set_registration(self, self.address.clone(), sequence);
        sequence
    }

    /// Remove `connection`. Returns `false` if it was not a member.
    pub(crate) fn remove(&self, connection: &Connection) -> bool {
        let id = connection.id();
        self.slots().remove_where(|c| c.id() == id).is_some()
    }

    /// Number of live connections.
    pub fn size(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Next connection in round-robin order, `None` if the group is empty.
    pub fn next(&self) -> Option<Arc<Connection>> {
        self.slots().next().cloned()
    }

    /// Connection at `sequence`, if occupied.
    pub fn get(&self, sequence: usize) -> Option<Arc<Connection>> {
        self.slots().get(sequence).cloned()
    }

    /// Snapshot of the live connections in slot order.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.slots().iter().map(|(_, c)| c.clone()).collect()
    }

    /// At least one connection has an open socket.
    pub fn is_connected(&self) -> bool {
        self.slots().iter().any(|(_, c)| c.is_connected())
    }

    /// At least one connection has finished its handshake.
    pub fn is_link_established(&self) -> bool {
        self.slots().iter().any(|(_, c)| c.is_link_established())
    }

    /// Wake waiters after a member changed state.
    pub(crate) fn notify_link_changed(&self) {
        self.link_changed.notify_waiters();
    }

    /// Wait until some member has established its link, or `timeout` elapses.
    ///
    /// Returns the final value of [`is_link_established`](Self::is_link_established);
    /// running out of time is not an error.
    pub async fn wait_for_link_established(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.link_changed.notified();
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

    /// e.g. `Client side group 10.0.0.1:7000 - 2 endpoints`.
    pub fn description(&self) -> String {
        let side = if self.is_client_side() { "Client" } else { "Server" };
        format!("{} side group {} - {} endpoints", side, self.address, self.size())
    }
}

impl fmt::Debug for EndPointGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndPointGroup")
            .field("address", &self.address)
            .field("side", &self.side)
            .field("size", &self.size())
            .finish()
    }
}

impl fmt::Display for EndPointGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Arc<EndPointGroup> {
        Arc::new(EndPointGroup::new(
            EndPointIdentifier::new("10.0.0.1", 7000),
            Side::Client,
        ))
    }

    fn conn() -> Arc<Connection> {
        Arc::new(Connection::client(EndPointIdentifier::new("10.0.0.1", 7000), None))
    }

    #[test]
    fn add_assigns_keys_and_back_reference() {
        let group = group();
        let c1 = conn();
        let c2 = conn();
        assert_eq!(group.add(c1.clone()), 1);
        assert_eq!(group.add(c2.clone()), 2);
        assert_eq!(c2.key().as_deref(), Some("10.0.0.1:7000[2]"));
        assert!(Arc::ptr_eq(&c1.group().unwrap(), &group));
        assert_eq!(group.size(), 2);
        assert_eq!(group.description(), "Client side group 10.0.0.1:7000 - 2 endpoints");
        assert!(group.accept_address().is_none());
    }

    #[test]
    fn round_robin_skips_removed_members() {
        let group = group();
        let (c1, c2, c3) = (conn(), conn(), conn());
        for c in [&c1, &c2, &c3] {
            group.add(c.clone());
        }
        let picks: Vec<_> = (0..4).map(|_| group.next().unwrap().id()).collect();
        assert_eq!(picks, vec![c1.id(), c2.id(), c3.id(), c1.id()]);

        assert!(group.remove(&c2));
        assert!(!group.remove(&c2));
        let picks: Vec<_> = (0..3).map(|_| group.next().unwrap().id()).collect();
        assert!(!picks.contains(&c2.id()));
        assert_eq!(group.size(), 2);
    }

    #[tokio::test]
    async fn wait_returns_false_on_timeout() {
        let group = group();
        group.add(conn());
        assert!(
            !group
                .wait_for_link_established(Some(Duration::from_millis(20)))
                .await
        );
    }

    #[tokio::test]
    async fn wait_wakes_on_link_established() {
        let group = group();
        let waiter = {
            let group = group.clone();
            tokio::spawn(async move {
                group
                    .wait_for_link_established(Some(Duration::from_secs(5)))
                    .await
            })
        };
        tokio::task::yield_now().await;

        // Joins after the wait started.
        let c = conn();
        group.add(c.clone());
        c.mark_connected();
        c.mark_link_established();
        group.notify_link_changed();

        assert!(waiter.await.unwrap());
        assert!(group.is_connected());
    }
}
