//! HTTP CONNECT tunneling against a fake proxy.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::{start_echo_peer, start_fake_proxy, test_config, wait_until};
use tcp_transport::net::factory::SocketFactory;
use tcp_transport::net::proxy::HttpProxySocketFactory;
use tcp_transport::{ConnectionRegistry, EndPointIdentifier, TransportError};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn tunnel_carries_data_to_the_target() {
    let (peer, _) = start_echo_peer().await;
    let (proxy, requests) = start_fake_proxy("HTTP/1.1 200 Connection established").await;
    let factory = HttpProxySocketFactory::new(
        Some(EndPointIdentifier::from(proxy)),
        Some("Basic abc".to_string()),
    );

    let mut socket = factory
        .create_socket(&EndPointIdentifier::from(peer))
        .await
        .unwrap();
    assert!(!socket.is_tls());
    socket.write_all(b"through the tunnel").await.unwrap();
    let mut buf = [0u8; 18];
    socket.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"through the tunnel");

    let heads = requests.lock().unwrap().clone();
    assert_eq!(heads.len(), 1);
    assert!(heads[0].starts_with(&format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n", peer.port())));
    assert!(heads[0].contains("Proxy-Authorization: Basic abc\r\n"));
}

#[tokio::test]
async fn refused_tunnel_reports_the_status_line() {
    let (proxy, _) = start_fake_proxy("HTTP/1.1 407 Proxy Authentication Required").await;
    let factory = HttpProxySocketFactory::new(Some(EndPointIdentifier::from(proxy)), None);

    let err = factory
        .create_socket(&EndPointIdentifier::new("127.0.0.1", 9))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("407"), "{err}");
}

#[tokio::test]
async fn registry_connects_through_the_configured_proxy() {
    let (peer, accepted) = start_echo_peer().await;
    let (proxy, requests) = start_fake_proxy("HTTP/1.1 200 OK").await;

    let mut config = test_config();
    config.connect.socket_factory = "http-proxy".into();
    config.proxy.host = "127.0.0.1".into();
    config.proxy.port = proxy.port();
    let registry = ConnectionRegistry::new(config).unwrap();

    let address = EndPointIdentifier::from(peer);
    let connection = registry.connect(&address, None).await.unwrap();
    assert!(connection.wait_for_link_established(Some(WAIT)).await);
    assert_eq!(registry.connection_count(&address), Some(1));
    assert_eq!(requests.lock().unwrap().len(), 1);
    assert!(
        wait_until(WAIT, || {
            let accepted = accepted.clone();
            async move { accepted.load(Ordering::SeqCst) == 1 }
        })
        .await
    );
    registry.shutdown().await;
}

#[tokio::test]
async fn registry_surfaces_proxy_refusal() {
    let (proxy, _) = start_fake_proxy("HTTP/1.1 407 Proxy Authentication Required").await;

    let mut config = test_config();
    config.connect.socket_factory = "http-proxy".into();
    config.connect.attempts = 1;
    config.proxy.host = "127.0.0.1".into();
    config.proxy.port = proxy.port();
    let registry = ConnectionRegistry::new(config).unwrap();

    let err = registry
        .connect(&EndPointIdentifier::new("127.0.0.1", 9), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connect(_)));
    assert!(err.to_string().contains("407"), "{err}");
    registry.shutdown().await;
}
