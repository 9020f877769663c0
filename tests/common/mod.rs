//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use tcp_transport::config::TransportConfig;

/// Start a peer that echoes everything back. Returns its address and the
/// number of connections it has accepted so far.
pub async fn start_echo_peer() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let (mut reader, mut writer) = socket.split();
                        let _ = tokio::io::copy(&mut reader, &mut writer).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, accepted)
}

/// Start a fake HTTP proxy answering every CONNECT with `status_line`
/// (e.g. `"HTTP/1.1 200 Connection established"`). On a 2xx reply the
/// connection is tunneled to the requested target. Returns the proxy
/// address and the request heads it received.
pub async fn start_fake_proxy(status_line: &'static str) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let seen = requests.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                let mut head = String::new();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    head.push_str(&line);
                    if line == "\r\n" {
                        break;
                    }
                }
                let target = head
                    .lines()
                    .next()
                    .and_then(|l| l.split_whitespace().nth(1))
                    .map(str::to_string);
                seen.lock().unwrap().push(head);

                let mut client = reader.into_inner();
                let reply = format!("{}\r\nContent-Length: 0\r\n\r\n", status_line);
                if client.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
                if !status_line.split_whitespace().nth(1).is_some_and(|s| s.starts_with('2')) {
                    return;
                }
                if let Some(target) = target {
                    if let Ok(mut upstream) = TcpStream::connect(target).await {
                        let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                    }
                }
            });
        }
    });

    (addr, requests)
}

/// Reserve `count` consecutive free local ports. The returned listeners hold them.
pub fn reserve_consecutive_ports(count: u16) -> Vec<std::net::TcpListener> {
    'search: for _ in 0..100 {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let begin = first.local_addr().unwrap().port();
        if begin.checked_add(count).is_none() {
            continue;
        }
        let mut held = vec![first];
        for port in begin + 1..begin + count {
            match std::net::TcpListener::bind(("127.0.0.1", port)) {
                Ok(listener) => held.push(listener),
                Err(_) => continue 'search,
            }
        }
        return held;
    }
    panic!("no run of {} free consecutive ports found", count);
}

/// A config with short connect timeouts for tests.
pub fn test_config() -> TransportConfig {
    let mut config = TransportConfig::default();
    config.connect.timeout_ms = 1000;
    config.connect.attempts = 2;
    config.registry.check_interval_secs = 0;
    config
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Read until the peer closes; returns what arrived.
pub async fn read_to_close(stream: &mut TcpStream, timeout: Duration) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    tokio::time::timeout(timeout, stream.read_to_end(&mut data))
        .await
        .ok()?
        .ok()?;
    Some(data)
}
