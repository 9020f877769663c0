//! Periodic connection checking.
//!
//! # Responsibilities
//! - Every interval, check each registered connection
//! - Disconnect connections that are still marked connected but whose
//!   socket is gone or whose handler reports them unhealthy

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::registry::ConnectionRegistry;

pub struct ConnectionChecker {
    registry: ConnectionRegistry,
    interval: Duration,
}

impl ConnectionChecker {
    pub fn new(registry: ConnectionRegistry, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Checker configured from the registry; `None` when checking is disabled.
    pub fn from_registry(registry: &ConnectionRegistry) -> Option<Self> {
        match registry.config().registry.check_interval_secs {
            0 => None,
            secs => Some(Self::new(registry.clone(), Duration::from_secs(secs))),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Connection checker starting");

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Connection checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one pass. Returns how many connections were disconnected.
    pub fn check_all(&self) -> usize {
        let handler = self.registry.handler().clone();
        let mut disconnected = 0;

        for connection in self.registry.connections() {
            let healthy = connection.check() && handler.check(&connection);
            if !healthy && connection.is_connected() {
                tracing::warn!(connection = %connection, "Connection check failed, disconnecting");
                if self.registry.disconnect(&connection) {
                    disconnected += 1;
                }
            }
        }
        disconnected
    }
}
