//! End-to-end registry behavior over real sockets.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use common::{read_to_close, start_echo_peer, test_config, wait_until};
use tcp_transport::net::connection::{Connection, Link};
use tcp_transport::registry::{ConnectionHandler, ConnectionObserver, ConnectionRegistry};
use tcp_transport::{ConnectionState, EndPointIdentifier, TransportError};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn client_connections_share_a_group_and_rotate() {
    let (peer, accepted) = start_echo_peer().await;
    let address = EndPointIdentifier::from(peer);
    let registry = ConnectionRegistry::new(test_config()).unwrap();

    let first = registry
        .get_connection_for_address(&address, true)
        .await
        .unwrap()
        .unwrap();
    let second = registry.connect(&address, None).await.unwrap();

    assert_eq!(registry.connection_count(&address), Some(2));
    assert_eq!(first.key(), Some(format!("{}[1]", address)));
    assert_eq!(second.key(), Some(format!("{}[2]", address)));
    assert!(first.is_client_side());

    let mut picks = Vec::new();
    for _ in 0..3 {
        let next = registry
            .get_connection_for_address(&address, false)
            .await
            .unwrap()
            .unwrap();
        picks.push(next.id());
    }
    assert!(picks.contains(&first.id()));
    assert!(picks.contains(&second.id()));
    assert_eq!(picks[0], picks[2]);

    assert!(registry.wait_for_link_established(Some(WAIT)).await);
    assert!(
        wait_until(WAIT, || {
            let accepted = accepted.clone();
            async move { accepted.load(Ordering::SeqCst) == 2 }
        })
        .await
    );

    registry.shutdown().await;
    assert!(first.is_disconnected());
    assert!(second.is_disconnected());
    assert!(registry.groups().is_empty());
    assert!(matches!(
        registry.connect(&address, None).await,
        Err(TransportError::PoolClosed(_))
    ));
}

#[tokio::test]
async fn wait_for_link_established_sees_later_connections() {
    let (peer, _) = start_echo_peer().await;
    let address = EndPointIdentifier::from(peer);
    let registry = ConnectionRegistry::new(test_config()).unwrap();

    assert!(
        !registry
            .wait_for_link_established(Some(Duration::from_millis(100)))
            .await
    );

    let waiter = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.wait_for_link_established(Some(WAIT)).await })
    };
    tokio::task::yield_now().await;

    let connection = registry.connect(&address, None).await.unwrap();
    assert!(waiter.await.unwrap());
    assert!(connection.wait_for_link_established(Some(WAIT)).await);
    assert!(registry.is_link_established());

    let group = registry.group(&address).unwrap();
    assert!(group.is_link_established());
    assert_eq!(
        group.description(),
        format!("Client side group {} - 1 endpoints", address)
    );
    registry.shutdown().await;
}

#[tokio::test]
async fn accepted_sockets_group_under_the_accept_address() {
    let mut config = test_config();
    config.listener.addresses = vec!["127.0.0.1:0".into()];
    let registry = ConnectionRegistry::new(config).unwrap();
    registry.start_listening().await.unwrap();

    let bound = registry.bound_addresses();
    assert_eq!(bound.len(), 1);
    let accept_address = bound[0].clone();
    assert_ne!(accept_address.port(), 0);

    let mut client = TcpStream::connect(("127.0.0.1", accept_address.port()))
        .await
        .unwrap();
    assert!(
        wait_until(WAIT, || {
            let registry = registry.clone();
            let accept_address = accept_address.clone();
            async move { registry.connection_count(&accept_address) == Some(1) }
        })
        .await
    );

    let group = registry.group(&accept_address).unwrap();
    assert!(!group.is_client_side());
    assert_eq!(group.accept_address(), Some(&accept_address));

    let rows = registry.snapshot();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].peer, Some(client.local_addr().unwrap()));
    assert_eq!(rows[0].sequence, 1);

    // Closing by key reaches the remote peer.
    assert!(registry.disconnect_by_key(&rows[0].key));
    assert!(!registry.disconnect_by_key(&rows[0].key));
    assert!(read_to_close(&mut client, WAIT).await.is_some());
    assert!(registry.group(&accept_address).is_none());

    registry.shutdown().await;
    assert!(registry.bound_addresses().is_empty());
}

#[tokio::test]
async fn peer_close_disconnects_and_unregisters() {
    let mut config = test_config();
    config.listener.addresses = vec!["127.0.0.1:0".into()];
    let registry = ConnectionRegistry::new(config).unwrap();
    registry.start_listening().await.unwrap();
    let accept_address = registry.bound_addresses()[0].clone();

    let client = TcpStream::connect(("127.0.0.1", accept_address.port()))
        .await
        .unwrap();
    assert!(
        wait_until(WAIT, || {
            let registry = registry.clone();
            async move { registry.total_connections() == 1 }
        })
        .await
    );
    let connection = registry.connections().remove(0);

    drop(client);
    assert!(
        wait_until(WAIT, || {
            let registry = registry.clone();
            async move { registry.total_connections() == 0 }
        })
        .await
    );
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    registry.shutdown().await;
}

/// Server side: the peer announces the address it wants to be known by.
#[derive(Debug)]
struct Announce;

#[async_trait]
impl ConnectionHandler for Announce {
    async fn establish_link(&self, link: &mut Link) -> bool {
        if link.connection().is_client_side() {
            return true;
        }
        let mut buf = [0u8; 64];
        let n = match link.read(&mut buf).await {
            Ok(n) if n > 0 => n,
            _ => return false,
        };
        match String::from_utf8_lossy(&buf[..n]).trim().parse() {
            Ok(announced) => link.connection().set_identifier(announced),
            Err(_) => false,
        }
    }
}

#[tokio::test]
async fn handler_can_refile_server_connections() {
    let mut config = test_config();
    config.listener.addresses = vec!["127.0.0.1:0".into()];
    let registry = ConnectionRegistry::builder(config)
        .handler(Arc::new(Announce))
        .build()
        .unwrap();
    registry.start_listening().await.unwrap();
    let accept_address = registry.bound_addresses()[0].clone();

    let mut client = TcpStream::connect(("127.0.0.1", accept_address.port()))
        .await
        .unwrap();
    client.write_all(b"10.9.9.9:4000\n").await.unwrap();

    assert!(registry.wait_for_link_established(Some(WAIT)).await);
    let announced = EndPointIdentifier::new("10.9.9.9", 4000);
    assert_eq!(registry.connection_count(&announced), Some(1));
    assert!(registry.group(&accept_address).is_none());

    let connection = registry.connections_for(&announced).remove(0);
    assert_eq!(connection.accept_address(), Some(&accept_address));
    assert_eq!(connection.key(), Some("10.9.9.9:4000[1]".to_string()));
    // Too late to move it again.
    assert!(!connection.set_identifier(EndPointIdentifier::new("10.9.9.9", 4001)));

    registry.shutdown().await;
}

#[derive(Default)]
struct Events(Mutex<Vec<&'static str>>);

impl ConnectionObserver for Events {
    fn connected(&self, _connection: &Arc<Connection>) {
        self.0.lock().unwrap().push("connected");
    }

    fn link_established(&self, _connection: &Arc<Connection>) {
        self.0.lock().unwrap().push("link established");
    }

    fn disconnected(&self, _connection: &Arc<Connection>) {
        self.0.lock().unwrap().push("disconnected");
    }
}

#[tokio::test]
async fn observers_see_each_transition_once() {
    let (peer, _) = start_echo_peer().await;
    let address = EndPointIdentifier::from(peer);
    let events = Arc::new(Events::default());
    let registry = ConnectionRegistry::builder(test_config())
        .observer(events.clone())
        .build()
        .unwrap();

    let connection = registry.connect(&address, None).await.unwrap();
    assert!(
        wait_until(WAIT, || {
            let events = events.clone();
            async move { events.0.lock().unwrap().len() == 2 }
        })
        .await
    );
    registry.disconnect(&connection);
    registry.disconnect(&connection);

    assert_eq!(
        *events.0.lock().unwrap(),
        vec!["connected", "link established", "disconnected"]
    );
    registry.shutdown().await;
}

#[tokio::test]
async fn reload_diffs_listening_addresses() {
    let registry = ConnectionRegistry::new(test_config()).unwrap();
    assert!(registry.listen_addresses().is_empty());

    let mut config = test_config();
    config.listener.addresses = vec!["127.0.0.1:0".into()];
    registry.apply_config(config.clone()).await.unwrap();
    assert_eq!(
        registry.listen_addresses(),
        vec![EndPointIdentifier::new("127.0.0.1", 0)]
    );
    let first = registry.bound_addresses();

    // Unchanged address list keeps the running acceptor.
    registry.apply_config(config).await.unwrap();
    assert_eq!(registry.bound_addresses(), first);

    registry.apply_config(test_config()).await.unwrap();
    assert!(registry.bound_addresses().is_empty());
    registry.shutdown().await;
}

#[tokio::test]
async fn refused_connect_is_reported_and_leaves_no_group() {
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let address = EndPointIdentifier::from(closed);
    let registry = ConnectionRegistry::new(test_config()).unwrap();

    let err = registry
        .get_connection_for_address(&address, true)
        .await
        .unwrap_err();
    match err {
        TransportError::Connect(e) => assert!(!e.is_timeout()),
        other => panic!("unexpected error: {other}"),
    }
    assert!(registry.group(&address).is_none());
    registry.shutdown().await;
}
