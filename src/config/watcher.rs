//! Configuration file watcher for hot reload.
//!
//! Editors often emit several modify events for one save, so a reload that
//! yields the configuration already delivered is dropped. A file that fails
//! to load leaves the running configuration in place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventHandler, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::TransportConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<TransportConfig>,
}

impl ConfigWatcher {
    /// Create a watcher and the receiver reloaded configurations arrive on.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<TransportConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let reloader = Reloader::seeded(self.path.clone(), self.update_tx);
        let mut watcher = RecommendedWatcher::new(
            reloader,
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Outcome of one reload.
#[derive(Debug, PartialEq, Eq)]
enum Reload {
    Sent,
    Unchanged,
    Rejected,
    Closed,
}

struct Reloader {
    path: PathBuf,
    tx: mpsc::UnboundedSender<TransportConfig>,
    last: Option<TransportConfig>,
}

impl Reloader {
    /// The file as loaded at startup counts as already delivered.
    fn seeded(path: PathBuf, tx: mpsc::UnboundedSender<TransportConfig>) -> Self {
        let last = load_config(&path).ok();
        Self { path, tx, last }
    }

    fn reload(&mut self) -> Reload {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                log_rejected(&self.path, &e);
                return Reload::Rejected;
            }
        };
        if self.last.as_ref() == Some(&config) {
            tracing::debug!(path = ?self.path, "Config file unchanged");
            return Reload::Unchanged;
        }
        if self.tx.send(config.clone()).is_err() {
            return Reload::Closed;
        }
        self.last = Some(config);
        tracing::info!(path = ?self.path, "Config reloaded");
        Reload::Sent
    }
}

impl EventHandler for Reloader {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        match event {
            Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                self.reload();
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, path = ?self.path, "Watch error"),
        }
    }
}

fn log_rejected(path: &Path, error: &ConfigError) {
    match error {
        // Usually a save in progress; the next event retries.
        ConfigError::Io(e) => {
            tracing::warn!(error = %e, ?path, "Config file unreadable, keeping current configuration");
        }
        ConfigError::Parse(e) => {
            tracing::error!(error = %e, ?path, "Config file malformed, keeping current configuration");
        }
        ConfigError::Validation(errors) => {
            for e in errors {
                tracing::error!(field = e.field, message = %e.message, ?path, "Invalid config value");
            }
            tracing::error!(
                count = errors.len(),
                ?path,
                "Config rejected, keeping current configuration"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write(file: &mut NamedTempFile, content: &str) {
        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        std::io::Seek::rewind(f).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    #[test]
    fn repeated_saves_deliver_once() {
        let mut file = NamedTempFile::new().unwrap();
        write(&mut file, "[connect]\ntimeout_ms = 1000\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reloader = Reloader::seeded(file.path().to_path_buf(), tx);

        assert_eq!(reloader.reload(), Reload::Unchanged);

        write(&mut file, "[connect]\ntimeout_ms = 2500\n");
        assert_eq!(reloader.reload(), Reload::Sent);
        assert_eq!(reloader.reload(), Reload::Unchanged);

        assert_eq!(rx.try_recv().unwrap().connect.timeout_ms, 2500);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broken_file_keeps_last_delivered() {
        let mut file = NamedTempFile::new().unwrap();
        write(&mut file, "[connect]\ntimeout_ms = 1000\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reloader = Reloader::seeded(file.path().to_path_buf(), tx);

        write(&mut file, "[connect\ntimeout_ms = ");
        assert_eq!(reloader.reload(), Reload::Rejected);

        // Restoring the original content is not a change.
        write(&mut file, "[connect]\ntimeout_ms = 1000\n");
        assert_eq!(reloader.reload(), Reload::Unchanged);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write(&mut file, "[connect]\ntimeout_ms = 1000\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reloader = Reloader::seeded(file.path().to_path_buf(), tx);

        write(&mut file, "[connect]\nattempts = 0\n[pool]\nmax_workers = 0\n");
        assert_eq!(reloader.reload(), Reload::Rejected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_file_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut reloader = Reloader::seeded(PathBuf::from("/nonexistent/transport.toml"), tx);
        assert!(reloader.last.is_none());
        assert_eq!(reloader.reload(), Reload::Rejected);
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let mut file = NamedTempFile::new().unwrap();
        write(&mut file, "[connect]\ntimeout_ms = 1000\n");
        let (tx, rx) = mpsc::unbounded_channel();
        let mut reloader = Reloader::seeded(file.path().to_path_buf(), tx);
        drop(rx);

        write(&mut file, "[connect]\ntimeout_ms = 3000\n");
        assert_eq!(reloader.reload(), Reload::Closed);
    }
}
