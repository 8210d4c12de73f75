//! hivecache is a distributed, read-through, in-memory key-value cache.
//!
//! # Introduction
//! Caches are organized into named **groups**. Each group fronts an authoritative data source
//! via a user supplied [Loader](group::Loader): on a cache miss the loader materializes the
//! value, which is then kept in a size constrained LRU cache. What makes hivecache a
//! *distributed* cache is that a cluster of nodes shares the work: a consistent hash ring
//! assigns every key to exactly one owning node, so the combined working set is sharded across
//! the cluster instead of being duplicated on every machine.
//!
//! A read therefore takes one of three routes:
//! 1. **Local hit** - the value is resident in this node's cache and returned immediately.
//! 2. **Peer fetch** - another node owns the key; the value is fetched from it over a minimal
//!    HTTP protocol and returned (but deliberately not cached here - the owner already caches
//!    it, and one canonical location per key is the whole point).
//! 3. **Local load** - this node owns the key (or the peer was unreachable); the loader runs,
//!    the value is cached locally and returned.
//!
//! Concurrent misses for the same key are coalesced by a [single-flight](singleflight) layer,
//! so a thundering herd of requests translates into at most one loader or peer call per key
//! and node.
//!
//! # Features
//! * **Byte-accurate LRU eviction** - each group's cache is bounded by a byte budget covering
//!   keys and values; the least recently used entries make room for new ones.
//! * **100% Async/Await** - the node builds upon [tokio](https://tokio.rs/) throughout; the
//!   peer protocol is served by axum and spoken by reqwest.
//! * **Reload-aware config facility** which permits to update the peer set or even the server
//!   address during operation. No restart is ever required, which matters for an in-memory
//!   cache with an expensive warm-up.
//! * **Simple and well documented code base**. hivecache is not a large framework; every user
//!   can browse and understand its source and know what to expect from the system.
//!
//! # Modules
//! * **[lru]**: the size constrained cache engine and its thread-safe wrapper.
//! * **[ring]**: the consistent hash ring assigning keys to cluster nodes.
//! * **[singleflight]**: per-key coalescing of concurrent loads.
//! * **[group]**: the read path tying the pieces together, plus the group registry.
//! * **[http]** / **[server]**: the HTTP transport between cluster nodes.
//!
//! # Using hivecache
//! A complete runnable node can be found in the `hivecache-io` crate of this workspace. The
//! short version:
//!
//! ```no_run
//! use std::sync::Arc;
//! use hivecache::builder::Builder;
//! use hivecache::group::{FnLoader, GroupRegistry};
//! use hivecache::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     let _group = platform.require::<GroupRegistry>().create_group(
//!         "users",
//!         64 * 1024 * 1024,
//!         Arc::new(FnLoader::new(|key: &str| {
//!             // ...consult the database here...
//!             Ok(key.as_bytes().to_vec())
//!         })),
//!     );
//!
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
#![deny(
    warnings,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod byteview;
pub mod config;
pub mod error;
pub mod fmt;
pub mod group;
pub mod http;
pub mod lru;
pub mod peers;
pub mod platform;
pub mod ring;
pub mod server;
pub mod signals;
pub mod singleflight;

/// Contains the version of the hivecache library.
pub const HIVECACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the hivecache build being used.
pub const HIVECACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up
/// the framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // We need to do this as otherwise the integration tests might crash as the logging system
    // is initialized several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned join handle to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate hivecache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing {
    use std::sync::Mutex;

    lazy_static::lazy_static! {
        /// Provides a global lock which has to be acquired if a test operates on shared
        /// resources - in our case the fixed local ports on which integration tests start
        /// their servers. Using this lock, all other tests still execute in parallel and
        /// only the port-binding ones serialize.
        pub static ref SHARED_TEST_RESOURCES: Mutex<()> = Mutex::new(());
    }

    /// Executes async code within a single threaded tokio runtime.
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }
}
