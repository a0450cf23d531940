//! Configuration file watcher for hot reload.

use super::{load_config, ProxyConfig};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Watches one config file and sends every valid new version over a channel.
///
/// Files that fail to parse or validate are logged and skipped, so the
/// receiver only ever sees usable configs.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start watching. Keep the returned watcher alive for as long as updates
    /// should flow.
    pub fn run(self) -> crate::Result<RecommendedWatcher> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?path, "config file change detected, reloading");
                    match load_config(&path) {
                        Ok(config) => {
                            if tx.send(config).is_err() {
                                tracing::debug!("config receiver dropped");
                            }
                        }
                        Err(e) => tracing::warn!(
                            error = %e,
                            "failed to reload config, keeping current configuration"
                        ),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(watch_error)?;

        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        tracing::info!(path = ?self.path, "config watcher started");
        Ok(watcher)
    }
}

fn watch_error(e: notify::Error) -> crate::Error {
    crate::Error::configuration_with_context(
        "failed to watch config file",
        crate::ErrorContext::new()
            .with_details(e.to_string())
            .with_source("config_watcher"),
    )
}
