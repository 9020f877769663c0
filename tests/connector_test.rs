//! Client-side connect bounds over real sockets.

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::{reserve_consecutive_ports, start_echo_peer};
use tcp_transport::net::factory::PlainSocketFactory;
use tcp_transport::resilience::connector::LocalBinding;
use tcp_transport::resilience::retries::RetryPolicy;
use tcp_transport::{BoundedConnector, ConnectError, EndPointIdentifier};

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn connector(attempts: u32) -> BoundedConnector {
    BoundedConnector::new(
        Arc::new(PlainSocketFactory),
        RetryPolicy::new(Duration::from_secs(1), attempts),
    )
}

#[tokio::test]
async fn port_scan_skips_ports_in_use() {
    let (peer, _) = start_echo_peer().await;
    let mut held = reserve_consecutive_ports(3);
    let begin = held[0].local_addr().unwrap().port();
    // Free the last port of the range.
    drop(held.pop());

    let connector = connector(1).with_local_binding(Some(LocalBinding {
        address: Some(LOOPBACK),
        port_begin: begin,
        port_end: begin + 2,
    }));
    let mut socket = connector
        .connect(&EndPointIdentifier::from(peer))
        .await
        .unwrap();
    assert_eq!(socket.local_addr().unwrap().port(), begin + 2);

    socket.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    socket.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn exhausted_port_range_never_reaches_the_peer() {
    let (peer, accepted) = start_echo_peer().await;
    let held = reserve_consecutive_ports(3);
    let begin = held[0].local_addr().unwrap().port();

    let connector = connector(3)
        .with_local_binding(Some(LocalBinding {
            address: Some(LOOPBACK),
            port_begin: begin,
            port_end: begin + 2,
        }))
        .silent(true);
    let err = connector
        .connect(&EndPointIdentifier::from(peer))
        .await
        .unwrap_err();

    match err {
        ConnectError::BindRangeExhausted {
            bind_address,
            begin: b,
            end,
        } => {
            assert_eq!(bind_address, LOOPBACK);
            assert_eq!(b, begin);
            assert_eq!(end, begin + 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
    drop(held);
}

#[tokio::test]
async fn refused_connect_reports_every_attempt() {
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let connector = BoundedConnector::new(
        Arc::new(PlainSocketFactory),
        RetryPolicy::new(Duration::from_millis(200), 2),
    )
    .silent(true);

    let err = connector
        .connect(&EndPointIdentifier::from(closed))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::Io { attempts: 2, .. }), "{err}");
    assert!(!err.is_timeout());
}

#[tokio::test]
async fn explicit_local_address_is_used() {
    let (peer, _) = start_echo_peer().await;
    let held = reserve_consecutive_ports(1);
    let port = held[0].local_addr().unwrap().port();
    drop(held);

    let socket = connector(1)
        .connect_from(
            &EndPointIdentifier::from(peer),
            std::net::SocketAddr::new(LOOPBACK, port),
        )
        .await
        .unwrap();
    assert_eq!(socket.local_addr().unwrap().port(), port);
}

#[tokio::test]
async fn wildcard_binding_follows_resolved_host_family() {
    let target = tokio::net::lookup_host(("localhost", 0))
        .await
        .unwrap()
        .next()
        .unwrap();
    let listener = tokio::net::TcpListener::bind(target).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let local_port = {
        let reserved = std::net::TcpListener::bind(target).unwrap();
        reserved.local_addr().unwrap().port()
    };

    let connector = connector(1).with_local_binding(Some(LocalBinding {
        address: None,
        port_begin: local_port,
        port_end: local_port,
    }));
    let socket = connector
        .connect(&EndPointIdentifier::new("localhost", port))
        .await
        .unwrap();
    let local = socket.local_addr().unwrap();
    assert_eq!(local.port(), local_port);
    assert_eq!(local.is_ipv4(), target.is_ipv4());
    drop(listener);
}
