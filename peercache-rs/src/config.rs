//! Loads the node settings from a YAML file and keeps them up to date.
//!
//! The file (by default **config/settings.yml**) is watched while the node is running and
//! re-read once it changed. Components which derive state from the settings subscribe via
//! [Config::notifier](Config::notifier) and re-apply them once a change is announced. This is
//! e.g. used by the [HttpPool](crate::http::HttpPool) to pick up a changed set of peers without
//! restarting the node (which would wipe all caches).
//!
//! # Settings
//!
//! ```yaml
//! server:
//!     # The address and port to bind the peer protocol to...
//!     host: 0.0.0.0
//!     port: 8001
//!     # The address under which other peers reach this node. This has to be exactly the
//!     # same string as used in the peers list below.
//!     base_url: http://localhost:8001
//! # The full set of nodes (including this one)...
//! peers:
//!     - http://localhost:8001
//!     - http://localhost:8002
//! groups:
//!     scores:
//!         # The max amount of memory for keys and values. Supports the suffixes
//!         # b, k, m, g, t. 0 disables the limit.
//!         max_memory: 2k
//! ```
//!
//! # Examples
//!
//! ```
//! # use peercache::config::Config;
//! let config = Config::new("somefile.yml");
//! config.load_from_string("
//! server:
//!     port: 12345
//! groups:
//!     scores:
//!         max_memory: 2k
//! ", None).unwrap();
//!
//! let handle = config.current();
//! assert_eq!(handle.query("server.port").as_i64().unwrap(), 12345);
//! assert_eq!(handle.group_capacity("scores", 0).unwrap(), 2048);
//! ```
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::error::{CacheError, Result};
use crate::fmt::parse_size;

/// Contains the default port of the peer protocol.
pub const DEFAULT_PORT: u16 = 8001;

/// Contains the default location of the settings file.
pub const DEFAULT_CONFIG_FILE: &str = "config/settings.yml";

/// Holds the most recently loaded settings document.
///
/// Readers obtain a [Handle](Handle) via **current()**, which never blocks a concurrent
/// reload.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Receives a message each time the settings have been (re)loaded.
///
/// The message carries no payload, fetch the new settings via [Config::current](Config::current).
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Provides a snapshot of the settings at the time it was obtained.
///
/// A snapshot never changes, therefore long-lived components should obtain a fresh one after
/// each change notification.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates an empty config bound to the given file.
    ///
    /// Note that this will neither load the file nor install a change listener. Use
    /// [install](install) to do both.
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Null, None))),
            tx,
        }
    }

    /// Subscribes to reload announcements.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Returns a snapshot of the current settings.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Returns when the settings file was last written, or **None** if there is no such file.
    ///
    /// An unmounted docker volume shows up as a directory and is treated as missing.
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Reads and applies the settings file.
    ///
    /// A missing file is not considered an error, the node simply runs with default settings.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        let last_modified = match self.last_modified().await {
            Some(last_modified) => last_modified,
            None => {
                log::info!("Config file doesn't exist or is a directory - skipping config load.");
                return Ok(());
            }
        };

        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        self.load_from_string(config_data.as_str(), Some(last_modified))
    }

    /// Parses and applies the given YAML document.
    ///
    /// If the data cannot be parsed, an error is returned and the previous config remains
    /// active.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let mut docs = YamlLoader::load_from_str(data).map_err(|error| {
            anyhow::anyhow!("Cannot parse config file {}: {}", &self.filename, error)
        })?;

        let doc = if docs.is_empty() {
            Yaml::Null
        } else {
            docs.swap_remove(0)
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Nobody might be subscribed yet, which is fine...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Returns the raw settings document.
    pub fn config(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dot separated path like **server.port**.
    ///
    /// Returns **Yaml::BadValue** if the path doesn't exist.
    pub fn query(&self, query: impl AsRef<str>) -> &Yaml {
        query
            .as_ref()
            .split('.')
            .fold(&self.config.0, |node, key| &node[key])
    }

    /// Returns the max memory configured for the given group.
    ///
    /// # Errors
    /// Fails with a [CacheError::Config](CacheError::Config) if a value is present but cannot
    /// be parsed.
    pub fn group_capacity(&self, group: &str, default_value: usize) -> Result<usize> {
        match self.query(format!("groups.{}.max_memory", group)) {
            Yaml::BadValue | Yaml::Null => Ok(default_value),
            Yaml::Integer(value) => usize::try_from(*value).map_err(|_| {
                CacheError::Config(format!("Invalid max_memory for group '{}'", group))
            }),
            Yaml::String(value) => parse_size(value).map_err(|error| {
                CacheError::Config(format!(
                    "Invalid max_memory for group '{}': {}",
                    group, error
                ))
            }),
            other => Err(CacheError::Config(format!(
                "Invalid max_memory for group '{}': {:?}",
                group, other
            ))),
        }
    }

    /// Returns the list of all peers (including the local node).
    pub fn peers(&self) -> Vec<String> {
        match self.query("peers") {
            Yaml::Array(peers) => peers
                .iter()
                .filter_map(|peer| peer.as_str())
                .map(|peer| peer.trim_end_matches('/').to_owned())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Returns the address (host and port) the peer protocol should bind to.
    pub fn server_address(&self) -> String {
        let host = self.query("server.host").as_str().unwrap_or("0.0.0.0");
        let port = self
            .query("server.port")
            .as_i64()
            .filter(|port| *port > 0 && *port <= u16::MAX as i64)
            .unwrap_or(DEFAULT_PORT as i64);

        format!("{}:{}", host, port)
    }

    /// Returns the address under which other peers reach this node.
    pub fn base_url(&self) -> String {
        match self.query("server.base_url").as_str() {
            Some(url) => url.trim_end_matches('/').to_owned(),
            None => format!("http://{}", self.server_address()),
        }
    }
}

/// Creates a **Config** for the given file, loads it and installs a change monitor.
///
/// The monitor checks the "last modified" date of the file every 2s and reloads it once it
/// changed. Note that this will not perform a structural comparison. Therefore it is the duty
/// of each config user to gracefully handle partial config changes. The monitor stops once
/// the returned config is dropped.
pub async fn install(file: &str) -> Arc<Config> {
    let config = Arc::new(Config::new(file));

    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(Arc::downgrade(&config));

    config
}

#[cfg(test)]
fn run_config_change_monitor(_config: Weak<Config>) {
    // Tests load their settings explicitly...
}

#[cfg(not(test))]
fn run_config_change_monitor(config: Weak<Config>) {
    crate::spawn!(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            let config = match config.upgrade() {
                Some(config) => config,
                None => return,
            };

            let on_disk = config.last_modified().await;
            let applied = config.config.load().1;

            // Reload if the file appeared or has been written since it was applied...
            if on_disk.is_some() && (applied.is_none() || on_disk > applied) {
                match config.load().await {
                    Ok(_) => log::info!("System configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });
}
