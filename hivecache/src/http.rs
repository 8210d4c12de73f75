//! Provides the HTTP transport which connects the cache nodes of a cluster.
//!
//! The [HttpPool] plays both sides of the wire protocol: it serves the values this node owns
//! under `GET <base><group>/<key>` (both segments URL-escaped, answered as raw
//! `application/octet-stream` bytes) and it fetches values owned by other nodes through one
//! [HttpGetter] per peer. Which node owns which key is decided by the embedded
//! [HashRing](crate::ring::HashRing).
//!
//! The peer set is taken from the `peers` list in the system config and re-applied whenever
//! the config is re-loaded, so nodes can join a cluster without restarting anyone.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast::error::RecvError;

use crate::config::{Config, Handle};
use crate::error::CacheError;
use crate::group::GroupRegistry;
use crate::peers::{PeerGetter, PeerPicker};
use crate::platform::Platform;
use crate::ring::HashRing;
use crate::spawn;

/// The path prefix under which cache values are served.
///
/// Part of the wire contract: all nodes of a cluster must use the same prefix.
pub const DEFAULT_BASE_PATH: &str = "/_hivecache/";

/// The number of virtual ring points contributed by each peer.
///
/// Part of the wire contract as well - nodes with differing replica counts disagree about
/// key ownership.
pub const DEFAULT_REPLICAS: usize = 50;

/// The port used when the config specifies none.
pub const DEFAULT_PORT: i64 = 9010;

/// The cluster view of a node: its own identity, the ring and the per-peer clients.
///
/// Kept behind one mutex so that a config re-load swaps the whole view consistently.
struct PoolState {
    self_url: String,
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

/// Connects this node to its cluster.
///
/// The pool implements [PeerPicker] on top of its consistent hash ring, which makes it
/// pluggable into any [Group](crate::group::Group) via
/// [register_peers](crate::group::Group::register_peers).
pub struct HttpPool {
    base_path: String,
    client: reqwest::Client,
    state: Mutex<PoolState>,
}

impl HttpPool {
    /// Creates a pool for a node reachable by its peers under the given URL.
    ///
    /// The URL doubles as this node's peer identifier: it has to appear in exactly the same
    /// form in the `peers` list of every cluster member.
    pub fn new(self_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HttpPool {
            base_path: DEFAULT_BASE_PATH.to_owned(),
            client,
            state: Mutex::new(PoolState {
                self_url: self_url.trim_end_matches('/').to_owned(),
                ring: HashRing::new(DEFAULT_REPLICAS, None),
                getters: HashMap::new(),
            }),
        }
    }

    /// Creates a pool based on the current system config and registers it as a platform
    /// service.
    ///
    /// The node's own URL is taken from `server.public_url` (falling back to a loopback URL
    /// derived from `server.port`), the peer set from the `peers` list. A listener keeps the
    /// peer set in sync with config re-loads. Note that this is called by the
    /// [Builder](crate::builder::Builder) unless the server is disabled.
    pub fn install(platform: &Arc<Platform>) -> Arc<HttpPool> {
        let config = platform.find::<Config>();

        let self_url = config
            .as_ref()
            .map(|config| self_url_from(&config.current()))
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", DEFAULT_PORT));

        let pool = Arc::new(HttpPool::new(&self_url));
        platform.register::<HttpPool>(pool.clone());

        if let Some(config) = config {
            pool.apply_config(&config.current());

            let platform = platform.clone();
            let pool = pool.clone();
            spawn!(async move {
                let mut notifier = config.notifier();
                while platform.is_running() {
                    match notifier.recv().await {
                        Ok(()) | Err(RecvError::Lagged(_)) => {
                            pool.apply_config(&config.current())
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            });
        }

        pool
    }

    /// Returns the URL under which this node expects to be addressed by its peers.
    pub fn self_url(&self) -> String {
        self.state.lock().unwrap().self_url.clone()
    }

    /// Re-reads this node's identity and the peer set from the given config snapshot.
    pub fn apply_config(&self, handle: &Handle) {
        if let Some(url) = handle.config()["server"]["public_url"].as_str() {
            let url = url.trim_end_matches('/');
            let mut state = self.state.lock().unwrap();
            if state.self_url != url {
                log::info!("This node is now addressable as {}.", url);
                state.self_url = url.to_owned();
            }
        }

        let peers: Vec<String> = handle.config()["peers"]
            .as_vec()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.as_str())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        // An absent or empty list leaves the current cluster view untouched, so that a
        // half-written config cannot sever a running node from its cluster.
        if !peers.is_empty() {
            self.set_peers(&peers);
        }
    }

    /// Replaces the cluster view with the given peer set.
    ///
    /// This rebuilds the consistent hash ring and creates one HTTP client wrapper per peer.
    /// The list should contain this node's own URL as well - otherwise the other peers and
    /// this node disagree about which keys are local.
    pub fn set_peers<S: AsRef<str>>(&self, peers: &[S]) {
        let peers: Vec<String> = peers
            .iter()
            .map(|peer| peer.as_ref().trim_end_matches('/').to_owned())
            .collect();

        let mut ring = HashRing::new(DEFAULT_REPLICAS, None);
        ring.add(&peers);

        let mut getters = HashMap::with_capacity(peers.len());
        for peer in &peers {
            let _ = getters.insert(
                peer.clone(),
                Arc::new(HttpGetter {
                    base_url: format!("{}{}", peer, self.base_path),
                    client: self.client.clone(),
                }),
            );
        }

        let mut state = self.state.lock().unwrap();
        state.ring = ring;
        state.getters = getters;

        log::info!(
            "{}: Installed a cluster view with {} peer(s).",
            state.self_url,
            peers.len()
        );
    }

    /// Builds the axum router serving this node's shard of all groups.
    pub fn router(&self, registry: Arc<GroupRegistry>) -> Router {
        Router::new()
            .route(&format!("{}*rest", self.base_path), get(serve_value))
            .with_state(registry)
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.state.lock().unwrap();

        match state.ring.get(key) {
            Some(peer) if peer != state.self_url => {
                log::debug!("{}: Key '{}' is owned by peer {}.", state.self_url, key, peer);
                state.getters.get(peer).map(|getter| {
                    let getter: Arc<dyn PeerGetter> = getter.clone();
                    getter
                })
            }
            _ => None,
        }
    }
}

/// Derives this node's peer identifier from the given config snapshot.
///
/// `server.public_url` wins; without it we assume a loopback cluster on the configured port,
/// which is what local development setups use.
fn self_url_from(handle: &Handle) -> String {
    match handle.config()["server"]["public_url"].as_str() {
        Some(url) => url.trim_end_matches('/').to_owned(),
        None => {
            let port = handle.config()["server"]["port"]
                .as_i64()
                .filter(|port| *port > 0 && *port <= u16::MAX as i64)
                .unwrap_or(DEFAULT_PORT);
            format!("http://127.0.0.1:{}", port)
        }
    }
}

/// Answers `GET <base><group>/<key>` with the raw bytes of the requested value.
async fn serve_value(
    State(registry): State<Arc<GroupRegistry>>,
    Path(rest): Path<String>,
) -> Response {
    let Some((group_name, key)) = rest.split_once('/') else {
        return (
            StatusCode::BAD_REQUEST,
            "Expected a request path of the form <group>/<key>.\n".to_owned(),
        )
            .into_response();
    };

    log::debug!("Serving {}/{}...", group_name, key);

    let Some(group) = registry.find(group_name) else {
        return (
            StatusCode::NOT_FOUND,
            format!("{}\n", CacheError::UnknownGroup(group_name.to_owned())),
        )
            .into_response();
    };

    match group.get(key).await {
        Ok(value) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            value.to_vec(),
        )
            .into_response(),
        Err(error @ CacheError::EmptyKey) => {
            (StatusCode::BAD_REQUEST, format!("{}\n", error)).into_response()
        }
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", error)).into_response(),
    }
}

/// Fetches values from one remote peer.
pub struct HttpGetter {
    base_url: String,
    client: reqwest::Client,
}

#[async_trait]
impl PeerGetter for HttpGetter {
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Vec<u8>> {
        let url = format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(group),
            urlencoding::encode(key)
        );

        let response = self.client.get(&url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(anyhow::anyhow!("Peer returned: {}", response.status()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use crate::http::{HttpPool, DEFAULT_REPLICAS};
    use crate::peers::PeerPicker;
    use crate::ring::HashRing;

    #[test]
    fn an_unconfigured_pool_handles_everything_locally() {
        let pool = HttpPool::new("http://127.0.0.1:9010");

        assert_eq!(pool.pick_peer("some-key").is_none(), true);
    }

    #[test]
    fn picking_follows_the_ring_and_skips_this_node() {
        let peers = ["http://127.0.0.1:9010", "http://127.0.0.1:9011"];
        let pool = HttpPool::new(peers[0]);
        pool.set_peers(&peers);

        // Rebuild the ring with the same wire parameters to know the expected owners...
        let mut ring = HashRing::new(DEFAULT_REPLICAS, None);
        ring.add(&peers);

        let mut remote = 0;
        for index in 0..100 {
            let key = format!("key-{}", index);
            let expected_remote = ring.get(&key) != Some(peers[0]);
            assert_eq!(pool.pick_peer(&key).is_some(), expected_remote);
            if expected_remote {
                remote += 1;
            }
        }

        // With two evenly weighted peers, a fair share of keys must be remote.
        assert_eq!(remote > 10, true);
    }

    #[test]
    fn trailing_slashes_do_not_split_the_cluster() {
        let pool = HttpPool::new("http://127.0.0.1:9010/");
        pool.set_peers(&["http://127.0.0.1:9010", "http://127.0.0.1:9011/"]);

        assert_eq!(pool.self_url(), "http://127.0.0.1:9010");

        // In spite of the slash mismatches, both URL forms collapse onto the same two ring
        // members: some keys stay local, some resolve to the remote peer.
        let remote = (0..100)
            .filter(|index| pool.pick_peer(&format!("key-{}", index)).is_some())
            .count();
        assert_eq!(remote > 10, true);
        assert_eq!(remote < 90, true);
    }
}
