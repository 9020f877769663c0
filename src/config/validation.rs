//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts, attempts, port ranges)
//! - Check that every address parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TransportConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::IpAddr;

use crate::config::schema::TransportConfig;
use crate::net::identifier::EndPointIdentifier;

/// Smallest accepted connect timeout.
pub const MIN_CONNECT_TIMEOUT_MS: u64 = 100;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for address in &config.listener.addresses {
        if let Err(e) = address.parse::<EndPointIdentifier>() {
            errors.push(ValidationError::new("listener.addresses", e.to_string()));
        }
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    if config.connect.timeout_ms <= MIN_CONNECT_TIMEOUT_MS {
        errors.push(ValidationError::new(
            "connect.timeout_ms",
            format!("must be > {}", MIN_CONNECT_TIMEOUT_MS),
        ));
    }
    if config.connect.attempts == 0 {
        errors.push(ValidationError::new("connect.attempts", "must be > 0"));
    }
    if let Some(bind) = config.connect.bind_address.as_deref() {
        if !bind.trim().is_empty() && bind.trim().parse::<IpAddr>().is_err() {
            errors.push(ValidationError::new(
                "connect.bind_address",
                format!("{:?} is not an IP address", bind),
            ));
        }
    }
    if config.connect.bind_port_begin == Some(0) || config.connect.bind_port_end == Some(0) {
        errors.push(ValidationError::new("connect.bind_port_begin", "ports must be > 0"));
    }
    if let (Some(begin), Some(end)) = (config.connect.bind_port_begin, config.connect.bind_port_end) {
        if begin > end {
            errors.push(ValidationError::new(
                "connect.bind_port_end",
                format!("range {}-{} is empty", begin, end),
            ));
        }
    }

    if config.pool.max_workers == 0 {
        errors.push(ValidationError::new("pool.max_workers", "must be > 0"));
    }

    if let Some(tls) = &config.tls {
        if !tls.protocol.trim().is_empty() {
            for (field, store) in [("tls.key_store", &tls.key_store), ("tls.trust_store", &tls.trust_store)] {
                if let Some(store) = store {
                    if store.path.trim().is_empty() {
                        errors.push(ValidationError::new(field, "path must be set"));
                    }
                }
            }
        }
    }

    if config.connect.socket_factory.trim() == "http-proxy" && config.proxy.host.trim().is_empty() {
        tracing::warn!("http-proxy socket factory selected without proxy.host; connecting directly");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
