//! Provides a builder which can be used to set up and initialize a cache node.
//!
//! The builder creates the [Platform](crate::platform::Platform) and installs the selected
//! components: logging, signal handling, the config facility, the group registry and the HTTP
//! server stack. Embedders which only want the in-process cache can disable the server parts
//! entirely.
//!
//! # Example
//! Setting up a node with all features enabled:
//! ```no_run
//! # use hivecache::builder::Builder;
//! # use hivecache::server::Server;
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the platform...
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Register cache groups here...
//!
//!     // Start the main event loop of the server...
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::sync::Arc;

use crate::group::GroupRegistry;
use crate::http::HttpPool;
use crate::platform::Platform;
use crate::server::Server;
use crate::{init_logging, HIVECACHE_REVISION, HIVECACHE_VERSION};

/// Initializes a node by creating and installing the enabled components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_registry: bool,
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
    /// convenient, but be aware that new components added in a library update will then also
    /// be enabled by default. This might or might not be the expected behaviour.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_registry = true;
        self.setup_server = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// As cache nodes are intended to run in docker containers, logging to stdout with a
    /// machine readable timestamp is all that is needed.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after
    /// [enable_all()](Builder::enable_all) has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the node once **CTRL-C** or **SIGHUP** is
    /// received. For more details see: [signals](crate::signals).
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

    /// Installs [Config](crate::config::Config) and loads **config/settings.yml**.
    ///
    /// For more details see: [config](crate::config).
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

    /// Creates and installs the [GroupRegistry](crate::group::GroupRegistry) holding all
    /// cache groups of this node.
    pub fn enable_registry(mut self) -> Self {
        self.setup_registry = true;
        self
    }

    /// Disables setting up a **GroupRegistry** after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_registry(mut self) -> Self {
        self.setup_registry = false;
        self
    }

    /// Creates and installs the cluster transport: the [HttpPool](crate::http::HttpPool) and
    /// the [Server](crate::server::Server) exposing it.
    ///
    /// Note that the main event loop still has to be invoked manually via:
    /// `platform.require::<Server>().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.setup_server = true;
        self
    }

    /// Disables setting up the server stack after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_server(mut self) -> Self {
        self.setup_server = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) with all enabled components
    /// installed.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "hivecache (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            HIVECACHE_VERSION,
            HIVECACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            crate::config::install(platform.clone()).await;
        }

        if self.setup_registry {
            let _ = GroupRegistry::install(&platform);
        }

        if self.setup_server {
            let _ = HttpPool::install(&platform);
            let _ = Server::install(&platform);
        }

        platform
    }
}
