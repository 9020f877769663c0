//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the registry (factories, TLS context, worker pool) from configuration
//! - Start background tasks (connection checker, config watcher)
//! - Bind listeners and begin accepting traffic
//! - Run until a shutdown signal, applying reloads on the way
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::path::PathBuf;

use notify::RecommendedWatcher;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{load_config, ConfigWatcher, TransportConfig};
use crate::error::TransportError;
use crate::health::ConnectionChecker;
use crate::lifecycle::signals::{SignalEvent, Signals};
use crate::registry::{ConnectionRegistry, RegistryBuilder};

/// A running transport process.
pub struct Daemon {
    registry: ConnectionRegistry,
    config_path: Option<PathBuf>,
    updates: Option<mpsc::UnboundedReceiver<TransportConfig>>,
    _watcher: Option<RecommendedWatcher>,
    checker: Option<JoinHandle<()>>,
}

/// Start with the default handler and factories.
pub async fn start(config: TransportConfig, config_path: Option<PathBuf>) -> Result<Daemon, TransportError> {
    start_with(ConnectionRegistry::builder(config), config_path).await
}

/// Start from a prepared registry builder (custom handler, factories or TLS managers).
pub async fn start_with(
    builder: RegistryBuilder,
    config_path: Option<PathBuf>,
) -> Result<Daemon, TransportError> {
    let registry = builder.build()?;
    tracing::info!("Connection registry ready");

    let checker = ConnectionChecker::from_registry(&registry)
        .map(|checker| tokio::spawn(checker.run(registry.subscribe_shutdown())));

    let (watcher, updates) = match &config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(watcher) => (Some(watcher), Some(updates)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    registry.start_listening().await?;
    tracing::info!(addresses = ?registry.bound_addresses(), "Accepting connections");

    Ok(Daemon {
        registry,
        config_path,
        updates,
        _watcher: watcher,
        checker,
    })
}

async fn next_update(updates: &mut Option<mpsc::UnboundedReceiver<TransportConfig>>) -> Option<TransportConfig> {
    match updates {
        Some(updates) => updates.recv().await,
        None => std::future::pending().await,
    }
}

impl Daemon {
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Run until Ctrl+C or SIGTERM, then shut the registry down.
    pub async fn run(mut self) -> Result<(), TransportError> {
        let mut signals = Signals::new()?;

        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Ok(SignalEvent::Shutdown) => {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                    Ok(SignalEvent::Reload) => self.reload_from_disk().await,
                    Err(e) => {
                        tracing::error!(error = %e, "Signal handling failed, shutting down");
                        break;
                    }
                },
                Some(config) = next_update(&mut self.updates) => self.apply(config).await,
            }
        }

        self.stop().await;
        Ok(())
    }

    async fn reload_from_disk(&self) {
        let Some(path) = &self.config_path else {
            tracing::info!("Reload requested but no config file in use");
            return;
        };
        match load_config(path) {
            Ok(config) => self.apply(config).await,
            Err(e) => tracing::error!(error = %e, "Failed to reload config. Keeping current configuration."),
        }
    }

    async fn apply(&self, config: TransportConfig) {
        if let Err(e) = self.registry.apply_config(config).await {
            tracing::error!(error = %e, "Failed to apply reloaded configuration");
        }
    }

    /// Shut the registry down and wait for the checker to exit.
    pub async fn stop(mut self) {
        self.registry.shutdown().await;
        if let Some(checker) = self.checker.take() {
            if let Err(e) = checker.await {
                tracing::debug!(error = %e, "Connection checker ended abnormally");
            }
        }
        tracing::info!("Shutdown complete");
    }
}
