//! Configuration file watcher for hot reload.
//!
//! A reload never mutates a running pool: the receiver side builds a new
//! filter from the new configuration and swaps it in.
//!
//! # Reload rules
//! - Command-line overrides are re-applied to every reloaded file
//! - A save that produces several change events is forwarded once
//! - The listener address cannot change without a restart; a new value is
//!   reported and ignored
//! - Effective pool sizes (after the ≤0 fallback) are logged at reload time

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::GatewayConfig;
use crate::config::validation::validate_config;
use crate::pool::PoolSettings;

/// Values given on the command line that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind_address: Option<String>,
    pub upstream_url: Option<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(bind) = &self.bind_address {
            config.listener.bind_address = bind.clone();
        }
        if let Some(upstream) = &self.upstream_url {
            config.upstream.url = upstream.clone();
        }
    }
}

/// Turns file-change notifications into configurations worth applying.
#[derive(Debug)]
struct Reloader {
    path: PathBuf,
    overrides: Overrides,
    bind_address: String,
    last_applied: Option<String>,
}

impl Reloader {
    fn new(path: &Path, overrides: Overrides, active: &GatewayConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            overrides,
            bind_address: active.listener.bind_address.clone(),
            last_applied: fingerprint(active),
        }
    }

    /// Load the file. `Ok(None)` means nothing changed since the last reload.
    fn reload(&mut self) -> Result<Option<GatewayConfig>, ConfigError> {
        let mut config = load_config(&self.path)?;
        self.overrides.apply(&mut config);

        if config.listener.bind_address != self.bind_address {
            tracing::warn!(
                configured = %config.listener.bind_address,
                listening = %self.bind_address,
                "Listener address changes need a restart, keeping the current one"
            );
            config.listener.bind_address = self.bind_address.clone();
        }
        validate_config(&config).map_err(ConfigError::Validation)?;

        let current = fingerprint(&config);
        if current.is_some() && current == self.last_applied {
            return Ok(None);
        }
        self.last_applied = current;

        let pool = PoolSettings::from_config(&config.host);
        tracing::info!(
            upstream = %config.upstream.url,
            max_total = pool.max_total,
            max_per_route = pool.max_per_route,
            ssl_hostname_validation = pool.ssl_hostname_validation,
            "Configuration file reloaded"
        );
        Ok(Some(config))
    }
}

fn fingerprint(config: &GatewayConfig) -> Option<String> {
    toml::to_string(config).ok()
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    reloader: Reloader,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `path`. `active` is the configuration the server
    /// starts with, overrides already applied.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(
        path: &Path,
        overrides: Overrides,
        active: &GatewayConfig,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                reloader: Reloader::new(path, overrides, active),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            mut reloader,
            update_tx,
        } = self;
        let path = reloader.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match reloader.reload() {
                        Ok(Some(config)) => {
                            let _ = update_tx.send(config);
                        }
                        Ok(None) => tracing::debug!("Config file unchanged, skipping reload"),
                        Err(e) => tracing::error!(
                            error = %e,
                            "Failed to reload config, keeping current configuration"
                        ),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
