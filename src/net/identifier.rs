//! Endpoint addressing.
//!
//! An [`EndPointIdentifier`] is an immutable `(host, port)` pair. Its
//! canonical string form (`host:port`, IPv6 hosts bracketed) is the key
//! under which endpoint groups are stored.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wildcard host used for listening addresses given as a bare port.
pub const ANY_LOCAL_HOST: &str = "0.0.0.0";

/// Error returned when an address string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid endpoint address {input:?}: {reason}")]
pub struct AddressParseError {
    pub input: String,
    pub reason: &'static str,
}

/// Value-typed `(host, port)` address of a TCP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndPointIdentifier {
    host: String,
    port: u16,
}

impl EndPointIdentifier {
    /// Create an identifier from a host name (or literal IP) and a port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map(str::to_string)
            .unwrap_or(host);
        Self { host, port }
    }

    /// Identifier for `port` on every local interface.
    pub fn any_local(port: u16) -> Self {
        Self::new(ANY_LOCAL_HOST, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Literal IP of the host, if the host is not a name.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Canonical string form used as the group map key.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Resolve to the first socket address. Literal IPs never hit DNS.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        if let Some(ip) = self.ip() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for {}", self),
                )
            })
    }
}

impl fmt::Display for EndPointIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for EndPointIdentifier {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for EndPointIdentifier {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let err = |reason| AddressParseError {
            input: s.to_string(),
            reason,
        };
        if input.is_empty() {
            return Err(err("empty address"));
        }

        // A bare port means every local interface.
        if let Ok(port) = input.parse::<u16>() {
            return Ok(Self::any_local(port));
        }

        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| err("unterminated '['"))?;
            let port = tail.strip_prefix(':').ok_or_else(|| err("missing port"))?;
            (host, port)
        } else {
            input.rsplit_once(':').ok_or_else(|| err("missing port"))?
        };

        if host.is_empty() {
            return Err(err("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| err("invalid port"))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for EndPointIdentifier {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EndPointIdentifier> for String {
    fn from(id: EndPointIdentifier) -> Self {
        id.to_string()
    }
}
