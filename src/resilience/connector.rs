//! Timeout- and retry-bounded socket creation.
//!
//! [`BoundedConnector`] turns a socket factory's connect call into one that
//! never keeps the caller waiting longer than `timeout × attempts`:
//!
//! ```text
//! for each attempt:
//!     explicit local address  -> factory.create_bound_socket(address, local)
//!     local binding config    -> scan ports begin..=end, AddrInUse = next port
//!     otherwise               -> factory.create_socket(address)
//!   (the call runs on its own task, the caller waits at most `timeout`)
//!   failure before the last attempt -> sleep out the rest of `timeout`, retry
//! ```
//!
//! An exhausted port range fails the call at once without contacting the
//! remote host.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::time::Instant;

use crate::config::{ConnectConfig, SocketConfig};
use crate::net::factory::SocketFactory;
use crate::net::identifier::EndPointIdentifier;
use crate::net::socket::{Socket, SocketOptions};
use crate::observability::metrics;
use crate::resilience::retries::RetryPolicy;
use crate::resilience::timeouts::{spawn_bounded, Bounded};

/// Definitive connect failure.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to connect to {address} after {attempts} attempt(s): {source}")]
    Io {
        address: EndPointIdentifier,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {address} after {attempts} attempt(s)")]
    TimedOut {
        address: EndPointIdentifier,
        attempts: u32,
    },

    #[error("no free local port on {bind_address} in range {begin}-{end}")]
    BindRangeExhausted {
        bind_address: IpAddr,
        begin: u16,
        end: u16,
    },

    #[error("no connect attempts allowed for {address}")]
    NoAttempts { address: EndPointIdentifier },

    #[error("connect to {address} was cancelled")]
    Cancelled { address: EndPointIdentifier },
}

impl ConnectError {
    /// Timed out without an explicit I/O error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectError::TimedOut { .. })
    }

    fn kind(&self) -> &'static str {
        match self {
            ConnectError::Io { .. } => "io",
            ConnectError::TimedOut { .. } => "timeout",
            ConnectError::BindRangeExhausted { .. } => "bind_range",
            ConnectError::NoAttempts { .. } => "no_attempts",
            ConnectError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Local address and port range client sockets are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalBinding {
    /// Local IP; `None` binds the wildcard address of the remote's family.
    pub address: Option<IpAddr>,
    pub port_begin: u16,
    pub port_end: u16,
}

impl LocalBinding {
    pub const DEFAULT_PORT_BEGIN: u16 = 1;
    pub const DEFAULT_PORT_END: u16 = 65535;

    /// The binding described by `config`, if any part of it is set.
    pub fn from_config(config: &ConnectConfig) -> Option<Self> {
        let address = config
            .bind_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());
        if address.is_none() && config.bind_port_begin.is_none() && config.bind_port_end.is_none()
        {
            return None;
        }
        let address = match address.map(str::parse::<IpAddr>) {
            Some(Ok(ip)) => Some(ip),
            Some(Err(e)) => {
                tracing::error!(error = %e, "Invalid client bind address, binding to wildcard");
                None
            }
            None => None,
        };
        Some(Self {
            address,
            port_begin: config.bind_port_begin.unwrap_or(Self::DEFAULT_PORT_BEGIN),
            port_end: config.bind_port_end.unwrap_or(Self::DEFAULT_PORT_END),
        })
    }

    fn local_ip(&self, remote: &EndPointIdentifier) -> IpAddr {
        self.address.unwrap_or(match remote.ip() {
            Some(IpAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        })
    }
}

/// Why one attempt failed.
enum AttemptError {
    Io(io::Error),
    TimedOut,
    RangeExhausted { ip: IpAddr, begin: u16, end: u16 },
    Cancelled,
}

/// Creates connected sockets, bounded in time and number of attempts.
#[derive(Debug, Clone)]
pub struct BoundedConnector {
    factory: Arc<dyn SocketFactory>,
    policy: RetryPolicy,
    binding: Option<LocalBinding>,
    options: SocketOptions,
    silent: bool,
}

impl BoundedConnector {
    pub fn new(factory: Arc<dyn SocketFactory>, policy: RetryPolicy) -> Self {
        Self {
            factory,
            policy,
            binding: None,
            options: SocketOptions::default(),
            silent: false,
        }
    }

    pub fn from_config(
        factory: Arc<dyn SocketFactory>,
        connect: &ConnectConfig,
        socket: &SocketConfig,
    ) -> Self {
        Self::new(factory, RetryPolicy::from_config(connect))
            .with_local_binding(LocalBinding::from_config(connect))
            .with_socket_options(SocketOptions::from(socket))
    }

    pub fn with_local_binding(mut self, binding: Option<LocalBinding>) -> Self {
        self.binding = binding;
        self
    }

    pub fn with_socket_options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Suppress retry and failure warnings.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn socket_options(&self) -> &SocketOptions {
        &self.options
    }

    /// Connect to `address`, honouring the configured local binding.
    pub async fn connect(&self, address: &EndPointIdentifier) -> Result<Socket, ConnectError> {
        self.connect_with(address, None).await
    }

    /// Connect to `address` from exactly `local` (address and port).
    pub async fn connect_from(
        &self,
        address: &EndPointIdentifier,
        local: SocketAddr,
    ) -> Result<Socket, ConnectError> {
        self.connect_with(address, Some(local)).await
    }

    async fn connect_with(
        &self,
        address: &EndPointIdentifier,
        local: Option<SocketAddr>,
    ) -> Result<Socket, ConnectError> {
        let result = self.run_attempts(address, local).await;
        match &result {
            Ok(socket) => {
                self.options.apply_or_warn(socket, "connect");
                tracing::debug!(address = %address, "Connected");
            }
            Err(e) => {
                metrics::record_connect_failure(e.kind());
                if !self.silent {
                    tracing::warn!(address = %address, error = %e, "Unable to connect");
                }
            }
        }
        result
    }

    async fn run_attempts(
        &self,
        address: &EndPointIdentifier,
        local: Option<SocketAddr>,
    ) -> Result<Socket, ConnectError> {
        let attempts = self.policy.attempts();
        if attempts == 0 {
            return Err(ConnectError::NoAttempts {
                address: address.clone(),
            });
        }

        let mut last_io_error = None;
        for attempt in 1..=attempts {
            let started = Instant::now();
            tracing::trace!(address = %address, attempt, max_attempts = attempts, "Connect attempt");

            let error = match self.attempt(address, local).await {
                Ok(socket) => return Ok(socket),
                Err(AttemptError::RangeExhausted { ip, begin, end }) => {
                    return Err(ConnectError::BindRangeExhausted {
                        bind_address: ip,
                        begin,
                        end,
                    });
                }
                Err(AttemptError::Cancelled) => {
                    return Err(ConnectError::Cancelled {
                        address: address.clone(),
                    });
                }
                Err(e) => e,
            };

            let reason = match &error {
                AttemptError::Io(e) => e.to_string(),
                _ => "timed out".to_string(),
            };
            if let AttemptError::Io(e) = error {
                last_io_error = Some(e);
            }

            if !self.policy.is_last(attempt) {
                if !self.silent {
                    tracing::warn!(
                        address = %address,
                        attempt,
                        max_attempts = attempts,
                        error = %reason,
                        "Connect attempt failed, retrying"
                    );
                }
                self.policy.pause_after(started).await;
            }
        }

        Err(match last_io_error {
            Some(source) => ConnectError::Io {
                address: address.clone(),
                attempts,
                source,
            },
            None => ConnectError::TimedOut {
                address: address.clone(),
                attempts,
            },
        })
    }

    async fn attempt(
        &self,
        address: &EndPointIdentifier,
        local: Option<SocketAddr>,
    ) -> Result<Socket, AttemptError> {
        let factory = self.factory.clone();
        let remote = address.clone();
        let limit = self.policy.attempt_timeout();

        let outcome = match (local, self.binding) {
            (Some(local), _) => {
                spawn_bounded(limit, async move {
                    factory
                        .create_bound_socket(&remote, local)
                        .await
                        .map_err(AttemptError::Io)
                })
                .await
            }
            (None, Some(binding)) => {
                let ip = binding.local_ip(address);
                spawn_bounded(limit, async move {
                    scan_ports(factory.as_ref(), &remote, ip, binding.port_begin, binding.port_end)
                        .await
                })
                .await
            }
            (None, None) => {
                spawn_bounded(limit, async move {
                    factory.create_socket(&remote).await.map_err(AttemptError::Io)
                })
                .await
            }
        };

        match outcome {
            Bounded::Completed(result) => result,
            Bounded::TimedOut => Err(AttemptError::TimedOut),
            Bounded::Cancelled => Err(AttemptError::Cancelled),
        }
    }
}

/// Try each local port in `begin..=end` until a bind succeeds.
async fn scan_ports(
    factory: &dyn SocketFactory,
    address: &EndPointIdentifier,
    ip: IpAddr,
    begin: u16,
    end: u16,
) -> Result<Socket, AttemptError> {
    for port in begin..=end {
        match factory
            .create_bound_socket(address, SocketAddr::new(ip, port))
            .await
        {
            Ok(socket) => {
                tracing::trace!(address = %address, local_port = port, "Bound client socket");
                return Ok(socket);
            }
            Err(e) if is_bind_conflict(&e) => continue,
            Err(e) => return Err(AttemptError::Io(e)),
        }
    }
    Err(AttemptError::RangeExhausted { ip, begin, end })
}

/// Errors that mean "this local port is taken", not "the remote is unreachable".
fn is_bind_conflict(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable | io::ErrorKind::PermissionDenied
    )
}
