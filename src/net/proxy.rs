//! HTTP CONNECT tunneling socket factory.
//!
//! Opens a TCP connection to an HTTP proxy, asks it to `CONNECT` to the
//! target, and hands back the tunneled stream once the proxy answers with a
//! 2xx status. Without a configured proxy host it connects directly.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::ProxyConfig;
use crate::net::factory::{connect_tcp, PlainSocketFactory, SocketFactory};
use crate::net::identifier::EndPointIdentifier;
use crate::net::socket::Socket;

/// Upper bound on the size of a proxy response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// User agent sent with CONNECT requests.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Socket factory tunneling through an HTTP proxy.
#[derive(Debug, Clone)]
pub struct HttpProxySocketFactory {
    proxy: Option<EndPointIdentifier>,
    authorization: Option<String>,
}

impl HttpProxySocketFactory {
    /// Tunnel through `proxy`. `authorization` is sent verbatim as `Proxy-Authorization`.
    pub fn new(proxy: Option<EndPointIdentifier>, authorization: Option<String>) -> Self {
        let authorization = authorization.filter(|a| !a.trim().is_empty());
        Self {
            proxy,
            authorization,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        let host = config.host.trim();
        let proxy = (!host.is_empty()).then(|| EndPointIdentifier::new(host, config.port));
        Self::new(proxy, Some(config.authorization.clone()))
    }

    pub fn proxy(&self) -> Option<&EndPointIdentifier> {
        self.proxy.as_ref()
    }

    async fn tunnel(
        &self,
        proxy: &EndPointIdentifier,
        target: &EndPointIdentifier,
        local: Option<SocketAddr>,
    ) -> io::Result<Socket> {
        tracing::debug!(proxy = %proxy, target = %target, "Creating tunneled socket via proxy");
        let mut stream = connect_tcp(proxy, local).await?;
        init_proxy_socket(&mut stream, self.authorization.as_deref(), target)
            .await
            .map_err(|e| io::Error::new(e.kind(), format!("proxy {}: {}", proxy, e)))?;
        Ok(Socket::Plain(stream))
    }
}

#[async_trait]
impl SocketFactory for HttpProxySocketFactory {
    async fn create_socket(&self, address: &EndPointIdentifier) -> io::Result<Socket> {
        match &self.proxy {
            Some(proxy) => self.tunnel(proxy, address, None).await,
            None => PlainSocketFactory.create_socket(address).await,
        }
    }

    async fn create_bound_socket(
        &self,
        address: &EndPointIdentifier,
        local: SocketAddr,
    ) -> io::Result<Socket> {
        match &self.proxy {
            Some(proxy) => self.tunnel(proxy, address, Some(local)).await,
            None => PlainSocketFactory.create_bound_socket(address, local).await,
        }
    }
}

/// Build the CONNECT request for `target`.
pub fn connect_request(target: &EndPointIdentifier, authorization: Option<&str>) -> String {
    let mut request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nUser-Agent: {USER_AGENT}\r\n"
    );
    if let Some(auth) = authorization.filter(|a| !a.trim().is_empty()) {
        request.push_str("Proxy-Authorization: ");
        request.push_str(auth.trim());
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request
}

/// Issue a CONNECT request over `stream` and validate the proxy's answer.
///
/// The response head is consumed byte by byte so that no tunneled data is
/// swallowed. Non-2xx answers fail with the proxy's status line in the message.
pub async fn init_proxy_socket<S>(
    stream: &mut S,
    authorization: Option<&str>,
    target: &EndPointIdentifier,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(connect_request(target, authorization).as_bytes())
        .await?;
    stream.flush().await?;

    let head = read_response_head(stream).await?;
    let status_line = head.lines().next().unwrap_or_default().trim().to_string();
    let code = parse_status_code(&status_line).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed proxy response: {:?}", status_line),
        )
    })?;

    if !(200..300).contains(&code) {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("tunnel to {} refused: {}", target, status_line),
        ));
    }
    Ok(())
}

async fn read_response_head<S>(stream: &mut S) -> io::Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") && !head.ends_with(b"\n\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy response head too large",
            ));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "proxy closed the connection before answering",
            ));
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn parse_status_code(status_line: &str) -> Option<u16> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}
