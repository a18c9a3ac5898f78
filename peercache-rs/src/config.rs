//! Contains the node configuration.
//!
//! Provides access to the configuration which is loaded from the **config/settings.yml** file.
//! Note that we observe this file for changes and reload it once a change is detected. Therefore
//! each user of the config should attach itself to the [Config::notifier](Config::notifier) and
//! re-process the config once a change message is received. This is e.g. used to change the
//! cluster membership or the server address without restarting the node.
//!
//! Note that the **Config** struct itself can be obtained from the **Platform** once and then
//! kept around. However, a [Handle](Handle) obtained via **Config::current()** should not be
//! stored, as it will not be updated once a new config has been loaded.
//!
//! # Examples
//!
//! Reading the config:
//! ```
//! # use peercache::config::Config;
//! let config = Config::new("settings.yml");
//! config.load_from_string("
//! peers:
//!     self: 'http://localhost:8001'
//!     members: ['http://localhost:8001', 'http://localhost:8002']
//! ", None).unwrap();
//!
//! let handle = config.current();
//! assert_eq!(handle.query("peers.self").as_str().unwrap(), "http://localhost:8001");
//! assert_eq!(handle.query("peers.members").as_vec().unwrap().len(), 2);
//! assert_eq!(handle.query("peers.unknown").is_badvalue(), true);
//! ```
//!
//! Attaching a change listener:
//! ```no_run
//! # use peercache::builder::Builder;
//! # use peercache::config::Config;
//! # #[tokio::main]
//! # async fn main() {
//! # let platform = Builder::new().enable_config().build().await;
//! let config = platform.require::<Config>();
//! tokio::spawn(async move {
//!     loop {
//!         match config.notifier().recv().await {
//!             Ok(_) => log::info!("Config update received..."),
//!             _ => return,
//!         }
//!     }
//! });
//! # }
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::platform::Platform;

/// Provides access to the node configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via `platform.require::<Config>()`.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// Internally this is simply the receiver of a broadcast. The actual message being broadcast
/// can and should be ignored. All that matters is, once a message has been received, the config
/// was changed and needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will not install a change listener. This is only done by the
    /// [install](install) function.
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Hash(Default::default()), None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// Within docker, the file is presented as volume. An unmounted volume shows up as
    /// directory, therefore we only accept files here.
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Forces the config to read the underlying file.
    ///
    /// Note that this is normally called by the framework and should not be invoked manually.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        let last_modified = match self.last_modified().await {
            Some(last_modified) => last_modified,
            None => {
                log::info!(
                    "Config file doesn't exist or is an unmounted docker volume - skipping config load."
                );
                return Ok(());
            }
        };

        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        self.load_from_string(config_data.as_str(), Some(last_modified))?;
        log::info!("{}", self.current().summary());

        Ok(())
    }

    /// Reloads the file if it is newer than the one loaded before (or if none has been loaded so
    /// far).
    ///
    /// Returns **true** if a new config has been loaded and broadcast. This is invoked every 2s
    /// by the change monitor installed via [install](install).
    pub async fn reload_if_modified(&self) -> anyhow::Result<bool> {
        // This is None if the file is absent...
        let last_modified = self.last_modified().await;
        if last_modified.is_none() {
            return Ok(false);
        }

        // ...and this is None if nothing has been loaded from disk yet.
        let last_loaded = self.config.load().1;
        if last_loaded.is_some() && last_modified <= last_loaded {
            return Ok(false);
        }

        self.load().await?;
        Ok(true)
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// This is intended to be used in test environments where we cannot / do not want to load
    /// a config file from disk. Note that a config which cannot be parsed is rejected and the
    /// previous config remains active.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let docs = YamlLoader::load_from_str(data)
            .with_context(|| format!("Cannot parse config file {}", &self.filename))?;

        let doc = match docs.into_iter().next() {
            Some(doc @ Yaml::Hash(_)) => doc,
            _ => Yaml::Hash(Default::default()),
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the root of the currently loaded configuration.
    pub fn config(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dot separated path like **peers.members** within the loaded configuration.
    ///
    /// Returns **Yaml::BadValue** if any part of the path is missing.
    pub fn query(&self, query: impl AsRef<str>) -> &Yaml {
        query
            .as_ref()
            .split('.')
            .fold(&self.config.0, |node, key| &node[key])
    }

    /// Describes the parts of the config which shape the node, for the log.
    pub fn summary(&self) -> String {
        format!(
            "Node config: server at {}:{}, {} peer(s), {} group(s).",
            self.query("server.host").as_str().unwrap_or("0.0.0.0"),
            self.query("server.port").as_i64().unwrap_or(8001),
            self.query("peers.members").as_vec().map(Vec::len).unwrap_or(0),
            self.query("groups").as_hash().map(|groups| groups.len()).unwrap_or(0)
        )
    }
}

/// Contains the config file which is read by [install](install).
pub const DEFAULT_CONFIG_FILE: &str = "config/settings.yml";

/// Creates and installs a **Config** for the given platform.
///
/// This will read its contents from **config/settings.yml** and also install a change listener
/// for this file. Note that this listener will only watch the "last modified" date of the file
/// and will not perform a structural comparison. Therefore it is the duty of each config user to
/// gracefully handle partial config changes.
///
/// Note that this method is also called by the [Builder](crate::builder::Builder) unless the
/// **Config** part is disabled.
pub async fn install(platform: Arc<Platform>) -> Arc<Config> {
    install_from(platform, DEFAULT_CONFIG_FILE).await
}

/// Creates and installs a **Config** which reads the given file.
///
/// Just like [install](install) this creates the enclosing directory, performs an initial load
/// and installs the change monitor.
pub async fn install_from(platform: Arc<Platform>, file: &str) -> Arc<Config> {
    // Create the enclosing directory so that a config can be dropped in later...
    if let Some(directory) = Path::new(file)
        .parent()
        .filter(|directory| !directory.as_os_str().is_empty())
    {
        if let Err(error) = tokio::fs::create_dir_all(directory).await {
            log::warn!(
                "Failed to create config base directory {}: {}",
                directory.to_string_lossy(),
                error
            )
        }
    }

    // Install a config instance pointing to the given file...
    let config = Arc::new(Config::new(file));
    platform.register::<Config>(config.clone());

    // Load the initial config. A node without a config still starts with all defaults...
    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    // Check for changes every 2s...
    run_config_change_monitor(platform, config.clone());

    config
}

#[cfg(test)]
fn run_config_change_monitor(_platform: Arc<Platform>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>) {
    crate::spawn!(async move {
        while platform.is_running() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            match config.reload_if_modified().await {
                Ok(true) => log::info!("Node configuration was re-loaded."),
                Ok(false) => (),
                Err(error) => log::error!("Failed to re-load node config: {:#}", error),
            }
        }
    });
}
