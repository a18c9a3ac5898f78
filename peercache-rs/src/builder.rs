//! Provides a builder which can be used to setup and initialize a cache node.
//!
//! As PeerCache consists of several components of which some are optional (e.g. a node used in
//! tests might not need signal handling or a server), the builder permits to selectively enable
//! or disable them.
//!
//! # Example
//! Setting up a node with all features enabled:
//! ```no_run
//! # use peercache::builder::Builder;
//! # use peercache::group::{Group, Registry};
//! # use peercache::peers::http::HttpPool;
//! # use peercache::server::Server;
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the platform...
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Register custom groups here...
//!     let group = Group::builder("scores")
//!         .max_memory(2 << 20)
//!         .getter_fn(|key| Ok(key.as_bytes().to_vec()))
//!         .build()
//!         .unwrap();
//!     group.register_peers(platform.require::<HttpPool>()).unwrap();
//!     platform.require::<Registry>().register(group);
//!
//!     // Start the main event loop of the server...
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::sync::Arc;

use crate::platform::Platform;
use crate::{init_logging, PEERCACHE_REVISION, PEERCACHE_VERSION};

/// Initializes a node by creating and initializing all core components.
///
/// Note that the order in which the components are installed is fixed: the peer pool reads its
/// members from the config and the server dispatches to the registry and the pool.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_registry: bool,
    setup_peers: bool,
    setup_server: bool,
}

impl Builder {
    /// Creates a new builder with all components disabled.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables all features.
    ///
    /// Note that using this method (and then maybe disabling selected components) is quite
    /// convenient, but be aware that new components which might be added in a library update
    /// will then also be enabled by default.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_registry = true;
        self.setup_peers = true;
        self.setup_server = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the node once **CTRL-C**, **SIGHUP** or
    /// **SIGTERM** is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables installing the signal listener after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Installs [config::Config](crate::config::Config) and loads the **settings.yml**.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables setting up a **Config** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Creates and installs an empty [Registry](crate::group::Registry) for groups.
    pub fn enable_registry(mut self) -> Self {
        self.setup_registry = true;
        self
    }

    /// Disables setting up a **Registry** after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_registry(mut self) -> Self {
        self.setup_registry = false;
        self
    }

    /// Creates and installs a [HttpPool](crate::peers::http::HttpPool) which follows the
    /// **peers** section of the config.
    ///
    /// For more details see: [peers](crate::peers)
    pub fn enable_peers(mut self) -> Self {
        self.setup_peers = true;
        self
    }

    /// Disables setting up a **HttpPool** after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_peers(mut self) -> Self {
        self.setup_peers = false;
        self
    }

    /// Creates and installs a [Server](crate::server::Server) instance.
    ///
    /// For more details see: [server](crate::server). Note that still, the main event loop
    /// has to be invoked manually via: `platform.require::<Server>().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.setup_server = true;
        self
    }

    /// Disables setting up a **Server** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_server(mut self) -> Self {
        self.setup_server = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) with all the enabled components
    /// being registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. PEERCACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            PEERCACHE_VERSION,
            PEERCACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            let _ = crate::config::install(platform.clone()).await;
        }

        if self.setup_registry {
            let _ = crate::group::install(&platform);
        }

        if self.setup_peers {
            let _ = crate::peers::install(&platform);
        }

        if self.setup_server {
            let _ = crate::server::Server::install(&platform);
        }

        platform
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::group::Registry;
    use crate::peers::http::HttpPool;
    use crate::server::Server;
    use crate::testing::test_async;

    #[test]
    fn only_enabled_components_are_installed() {
        test_async(async {
            let platform = Builder::new()
                .enable_all()
                .disable_signals()
                .disable_server()
                .build()
                .await;

            assert_eq!(platform.find::<Config>().is_some(), true);
            assert_eq!(platform.find::<Registry>().is_some(), true);
            assert_eq!(platform.find::<HttpPool>().is_some(), true);
            assert_eq!(platform.find::<Server>().is_none(), true);

            platform.terminate();
        });
    }

    #[test]
    fn an_empty_builder_installs_nothing() {
        test_async(async {
            let platform = Builder::new().build().await;

            assert_eq!(platform.find::<Config>().is_none(), true);
            assert_eq!(platform.find::<Registry>().is_none(), true);
            assert_eq!(platform.find::<HttpPool>().is_none(), true);
        });
    }
}
