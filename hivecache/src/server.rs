//! Contains the HTTP server component of a node.
//!
//! Opens a server socket on the configured address (**server.host** / **server.port** in the
//! config, `0.0.0.0:9010` as fallback) and serves the routes of the
//! [HttpPool](crate::http::HttpPool) to the other cluster members.
//!
//! To achieve zero downtime demands, the server periodically re-tries to bind the socket if
//! the port is taken, so a new instance can be started while the old one bleeds out and the
//! port is handed through with minimal interruption. The config is also observed: if the
//! server address changes, the socket is re-created at the new address without a restart.
//!
//! # Example
//!
//! ```no_run
//! use hivecache::builder::Builder;
//! use hivecache::config::Config;
//! use hivecache::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     platform.require::<Config>().load_from_string("
//!         server:
//!             port: 9010
//!     ", None).unwrap();
//!
//!     // Run the main event loop of the node...
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;

use crate::config::Config;
use crate::group::GroupRegistry;
use crate::http::{HttpPool, DEFAULT_PORT};
use crate::platform::Platform;
use crate::spawn;

/// Specifies how often the server loops check whether they should keep running.
///
/// Both the bind-retry loop and the graceful shutdown watcher wake up at this interval to
/// observe the platform state and the configured address.
const RUNNING_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Represents the server which exposes this node's shard over HTTP.
pub struct Server {
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    platform: Arc<Platform>,
}

impl Server {
    /// Creates and installs a **Server** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    /// Also note that this will not technically start the server. This has to be done
    /// manually via [event_loop](Server::event_loop), as it is most probably done in the main
    /// thread.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(Server {
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            platform: platform.clone(),
        });

        platform.register::<Server>(server.clone());

        server
    }

    /// Determines if the server socket should keep serving.
    ///
    /// In contrast to **Platform::is_running** this is not used to control the shutdown of
    /// the whole node. Rather, this flag is lowered once a config change moved the server
    /// address, so that the serve loop exits and the event loop re-creates the socket at the
    /// new address.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Determines the server address based on the current configuration.
    ///
    /// If no, an invalid or a partial config is present, fallback values are used. By default
    /// we bind to "0.0.0.0" on port 9010.
    fn address(&self) -> String {
        self.platform
            .find::<Config>()
            .map(|config| {
                let handle = config.current();
                format!(
                    "{}:{}",
                    handle.config()["server"]["host"].as_str().unwrap_or("0.0.0.0"),
                    handle.config()["server"]["port"]
                        .as_i64()
                        .filter(|port| *port > 0 && *port <= u16::MAX as i64)
                        .unwrap_or(DEFAULT_PORT)
                )
            })
            .unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_PORT))
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by test scenarios where the test itself runs in the main
    /// thread.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the server socket is bound.
    ///
    /// Just like **fork** this is intended to be used in test environments.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while server.current_address.lock().unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Tries to open a server socket on the configured address and serves incoming requests.
    ///
    /// Once binding succeeds, requests are served until either the platform shuts down or the
    /// configured address changes. In the latter case the loop starts over and binds the new
    /// address. If binding fails (e.g. because an old instance still holds the port), we
    /// silently retry every 500ms and only log the condition every 5s to not jam the log.
    pub async fn event_loop(self: &Arc<Self>) {
        let mut address = String::new();
        let mut last_bind_error_reported = Instant::now();

        while self.platform.is_running() {
            // If the server is started for the first time or has been restarted due to a
            // config change, we need to re-load the address...
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match TcpListener::bind(&address).await {
                Ok(listener) => {
                    log::info!("Opened server socket on {}...", &address);
                    *self.current_address.lock().unwrap() = Some(address.clone());
                    self.serve(listener).await;
                    *self.current_address.lock().unwrap() = None;
                    log::info!("Closed server socket on {}.", &address);
                }
                Err(_) => {
                    if Instant::now()
                        .duration_since(last_bind_error_reported)
                        .as_secs()
                        > 5
                    {
                        log::error!(
                            "Cannot open server address: {}. Retrying every 500ms...",
                            &address
                        );
                        last_bind_error_reported = Instant::now();
                    }
                    tokio::time::sleep(RUNNING_CHECK_INTERVAL).await;
                }
            }
        }
    }

    /// Serves requests on the bound socket until a shutdown condition is observed.
    async fn serve(self: &Arc<Self>, listener: TcpListener) {
        let pool = self.platform.require::<HttpPool>();
        let registry = self.platform.require::<GroupRegistry>();
        let app = pool.router(registry);

        let server = self.clone();
        let shutdown = async move { server.await_shutdown().await };

        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            log::error!("The HTTP server terminated abnormally: {}", error);
        }
    }

    /// Resolves once the serve loop should wind down.
    async fn await_shutdown(&self) {
        loop {
            tokio::time::sleep(RUNNING_CHECK_INTERVAL).await;

            if !self.platform.is_running() || !self.is_running() {
                return;
            }

            // If a config change moved the server address, exit to the event loop which will
            // re-create the socket at the new address...
            let expected = self.address();
            let current = self.current_address.lock().unwrap().clone();
            if current.as_deref() != Some(expected.as_str()) {
                log::info!("Server address has changed. Restarting server socket...");
                self.running.store(false, Ordering::Release);
                return;
            }
        }
    }
}
