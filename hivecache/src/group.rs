//! Provides cache groups and the registry which manages them.
//!
//! A [Group] is a named cache namespace in front of an authoritative data source. Reading a
//! key consults the local cache first, then the cluster peer owning the key and finally the
//! user supplied [Loader]. Concurrent reads for the same key are coalesced so that the
//! expensive part runs at most once per node, no matter how many callers pile up.
//!
//! Groups are created and looked up through the [GroupRegistry], which is installed as a
//! platform service by the [Builder](crate::builder::Builder).
//!
//! # Examples
//! ```
//! # use std::sync::Arc;
//! # use hivecache::group::{FnLoader, GroupRegistry};
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = GroupRegistry::new();
//!
//! // Each group wraps a loader which produces values for cache misses...
//! let group = registry.create_group(
//!     "greetings",
//!     64 * 1024,
//!     Arc::new(FnLoader::new(|key: &str| Ok(format!("Hello {}!", key).into_bytes()))),
//! );
//!
//! let value = group.get("world").await.unwrap();
//! assert_eq!(value.to_string(), "Hello world!");
//! # }
//! ```
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;

use crate::byteview::ByteView;
use crate::error::CacheError;
use crate::fmt::format_size;
use crate::lru::cache::{CacheStats, MainCache};
use crate::peers::PeerPicker;
use crate::platform::Platform;
use crate::singleflight::SingleFlight;

/// Produces the authoritative value for a key on a cache miss.
///
/// This is the only piece users have to supply: anything which, given a key, yields the raw
/// bytes of its value or an error. Loader errors are terminal for the affected read and are
/// handed to every coalesced caller.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Materializes the value for the given key.
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a plain function or closure into a [Loader].
///
/// # Examples
/// ```
/// # use hivecache::group::FnLoader;
/// let loader = FnLoader::new(|key: &str| Ok(key.as_bytes().to_vec()));
/// ```
pub struct FnLoader<F> {
    callback: F,
}

impl<F> FnLoader<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    /// Wraps the given callback.
    pub fn new(callback: F) -> Self {
        FnLoader { callback }
    }
}

#[async_trait]
impl<F> Loader for FnLoader<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.callback)(key)
    }
}

/// A named cache namespace backed by a loader and, optionally, by cluster peers.
pub struct Group {
    name: String,
    loader: Arc<dyn Loader>,
    main_cache: MainCache,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    flight: SingleFlight<Result<ByteView, CacheError>>,
}

impl Group {
    fn new(name: &str, cache_bytes: usize, loader: Arc<dyn Loader>) -> Self {
        Group {
            name: name.to_owned(),
            loader,
            main_cache: MainCache::new(cache_bytes),
            peers: OnceLock::new(),
            flight: SingleFlight::new(),
        }
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads the value for the given key.
    ///
    /// The lookup order is fixed: the local cache, then the cluster peer owning the key (if
    /// peers are registered and the owner is a remote node), then the loader of this group.
    /// Values produced by the loader are stored locally before being returned; values fetched
    /// from a peer are not, as the peer already is their canonical cache location.
    pub async fn get(&self, key: &str) -> Result<ByteView, CacheError> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        if let Some(value) = self.main_cache.get(key) {
            log::debug!("{}: Cache hit for '{}'.", self.name, key);
            return Ok(value);
        }

        self.load(key).await
    }

    /// Installs the peer picker deciding which cluster node owns which key.
    ///
    /// This can be done at most once per group; a second attempt fails.
    pub fn register_peers(&self, picker: Arc<dyn PeerPicker>) -> Result<(), CacheError> {
        self.peers.set(picker).map_err(|_| {
            CacheError::Configuration(format!(
                "Peers have already been registered for group '{}'!",
                self.name
            ))
        })
    }

    /// Provides a snapshot of the local cache state of this group.
    pub fn stats(&self) -> CacheStats {
        self.main_cache.stats()
    }

    /// Funnels a cache miss through the flight group, so that concurrent misses for one key
    /// share a single peer request or loader invocation.
    async fn load(&self, key: &str) -> Result<ByteView, CacheError> {
        self.flight.execute(key, || self.load_once(key)).await
    }

    async fn load_once(&self, key: &str) -> Result<ByteView, CacheError> {
        if let Some(peers) = self.peers.get() {
            if let Some(peer) = peers.pick_peer(key) {
                match peer.get(&self.name, key).await {
                    // Deliberately not cached here: the owning peer is the one canonical
                    // cache location for this key.
                    Ok(bytes) => return Ok(ByteView::from(bytes)),
                    Err(error) => log::warn!(
                        "{}: Fetching '{}' from the owning peer failed ({}). Falling back to the local loader...",
                        self.name,
                        key,
                        error
                    ),
                }
            }
        }

        self.load_locally(key).await
    }

    async fn load_locally(&self, key: &str) -> Result<ByteView, CacheError> {
        let bytes = self
            .loader
            .load(key)
            .await
            .map_err(|error| CacheError::upstream(key, error))?;

        let value = ByteView::from(bytes);
        self.main_cache.insert(key, value.clone());

        Ok(value)
    }
}

/// The directory of all cache groups of this process.
///
/// Lookups vastly outnumber group creations, therefore the directory is guarded by a
/// reader-writer lock: concurrent readers pass each other, only registrations serialize.
#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl GroupRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        GroupRegistry::default()
    }

    /// Creates a registry and registers it as a service in the given platform.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    pub fn install(platform: &Arc<Platform>) -> Arc<GroupRegistry> {
        let registry = Arc::new(GroupRegistry::new());
        platform.register::<GroupRegistry>(registry.clone());

        registry
    }

    /// Creates a group with the given name, cache budget (0 = unbounded) and loader.
    ///
    /// Registering a name twice replaces the previous group. This mirrors plain map semantics
    /// and is logged loudly - callers are expected to pick unique names.
    pub fn create_group(
        &self,
        name: &str,
        cache_bytes: usize,
        loader: Arc<dyn Loader>,
    ) -> Arc<Group> {
        let group = Arc::new(Group::new(name, cache_bytes, loader));

        match cache_bytes {
            0 => log::info!("Created cache group '{}' with an unbounded budget.", name),
            _ => log::info!(
                "Created cache group '{}' with a budget of {}.",
                name,
                format_size(cache_bytes)
            ),
        }

        if self
            .groups
            .write()
            .unwrap()
            .insert(name.to_owned(), group.clone())
            .is_some()
        {
            log::warn!("Replaced an existing cache group named '{}'!", name);
        }

        group
    }

    /// Looks up the group with the given name.
    pub fn find(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().unwrap().get(name).cloned()
    }

    /// Lists the names of all registered groups.
    pub fn group_names(&self) -> Vec<String> {
        self.groups.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::CacheError;
    use crate::group::{FnLoader, GroupRegistry, Loader};
    use crate::peers::{PeerGetter, PeerPicker};

    /// A loader which upper-cases the requested key and counts its invocations.
    ///
    /// The optional delay keeps a load "in flight" long enough for coalescing tests.
    struct UpperCaseLoader {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl UpperCaseLoader {
        fn new() -> Self {
            UpperCaseLoader {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn slow() -> Self {
            UpperCaseLoader {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
            }
        }
    }

    #[async_trait]
    impl Loader for UpperCaseLoader {
        async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(key.to_uppercase().into_bytes())
        }
    }

    /// A peer stack whose single getter either answers with a fixed value or fails.
    struct FixedPeer {
        response: Option<&'static str>,
        requests: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PeerGetter for FixedPeer {
        async fn get(&self, _group: &str, _key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.requests.fetch_add(1, Ordering::SeqCst);
            match self.response {
                Some(response) => Ok(response.as_bytes().to_vec()),
                None => Err(anyhow::anyhow!("peer unreachable")),
            }
        }
    }

    struct FixedPicker {
        getter: Arc<FixedPeer>,
    }

    impl PeerPicker for FixedPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            Some(self.getter.clone())
        }
    }

    #[tokio::test]
    async fn misses_are_loaded_and_then_served_from_the_cache() {
        let registry = GroupRegistry::new();
        let loader = Arc::new(UpperCaseLoader::new());
        let group = registry.create_group("test", 2048, loader.clone());

        // The first read materializes the value via the loader...
        assert_eq!(group.get("abc").await.unwrap().to_vec(), b"ABC");
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

        // ...the second one is a pure cache hit.
        assert_eq!(group.get("abc").await.unwrap().to_vec(), b"ABC");
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().entries, 1);
    }

    #[tokio::test]
    async fn empty_keys_are_rejected() {
        let registry = GroupRegistry::new();
        let group = registry.create_group(
            "test",
            1024,
            Arc::new(FnLoader::new(|key: &str| Ok(key.as_bytes().to_vec()))),
        );

        let error = group.get("").await.unwrap_err();
        assert_eq!(matches!(error, CacheError::EmptyKey), true);
    }

    #[tokio::test]
    async fn loader_failures_are_reported_as_upstream_errors() {
        let registry = GroupRegistry::new();
        let group = registry.create_group(
            "test",
            1024,
            Arc::new(FnLoader::new(|_key: &str| {
                Err(anyhow::anyhow!("row not found"))
            })),
        );

        let error = group.get("missing").await.unwrap_err();
        assert_eq!(error.to_string().contains("missing"), true);
        assert_eq!(error.to_string().contains("row not found"), true);

        // A failed load must not populate the cache...
        assert_eq!(group.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_load() {
        let registry = GroupRegistry::new();
        let loader = Arc::new(UpperCaseLoader::slow());
        let group = registry.create_group("coalesced", 2048, loader.clone());

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let group = group.clone();
            tasks.push(tokio::spawn(async move { group.get("abc").await }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().to_vec(), b"ABC");
        }

        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn peer_values_are_returned_but_not_cached_locally() {
        let registry = GroupRegistry::new();
        let loader = Arc::new(UpperCaseLoader::new());
        let group = registry.create_group("test", 2048, loader.clone());

        let requests = Arc::new(AtomicUsize::new(0));
        group
            .register_peers(Arc::new(FixedPicker {
                getter: Arc::new(FixedPeer {
                    response: Some("from-peer"),
                    requests: requests.clone(),
                }),
            }))
            .unwrap();

        // Both reads are answered by the owning peer; the local loader stays idle and the
        // local cache stays empty as the peer is the canonical location for this key.
        assert_eq!(group.get("abc").await.unwrap().to_vec(), b"from-peer");
        assert_eq!(group.get("abc").await.unwrap().to_vec(), b"from-peer");
        assert_eq!(requests.load(Ordering::SeqCst), 2);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(group.stats().entries, 0);
    }

    #[tokio::test]
    async fn peer_failures_fall_back_to_the_local_loader() {
        let registry = GroupRegistry::new();
        let loader = Arc::new(UpperCaseLoader::new());
        let group = registry.create_group("test", 2048, loader.clone());

        let requests = Arc::new(AtomicUsize::new(0));
        group
            .register_peers(Arc::new(FixedPicker {
                getter: Arc::new(FixedPeer {
                    response: None,
                    requests: requests.clone(),
                }),
            }))
            .unwrap();

        // The peer fails, the loader answers - and its value is cached, so the second read
        // does not even consult the peer again.
        assert_eq!(group.get("abc").await.unwrap().to_vec(), b"ABC");
        assert_eq!(group.get("abc").await.unwrap().to_vec(), b"ABC");
        assert_eq!(requests.load(Ordering::SeqCst), 1);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().entries, 1);
    }

    #[tokio::test]
    async fn peers_can_only_be_registered_once() {
        let registry = GroupRegistry::new();
        let group = registry.create_group(
            "test",
            1024,
            Arc::new(FnLoader::new(|key: &str| Ok(key.as_bytes().to_vec()))),
        );

        let requests = Arc::new(AtomicUsize::new(0));
        let picker = || {
            Arc::new(FixedPicker {
                getter: Arc::new(FixedPeer {
                    response: Some("x"),
                    requests: requests.clone(),
                }),
            })
        };

        assert_eq!(group.register_peers(picker()).is_ok(), true);

        let error = group.register_peers(picker()).unwrap_err();
        assert_eq!(matches!(error, CacheError::Configuration(_)), true);
    }

    #[tokio::test]
    async fn the_registry_finds_groups_by_name() {
        let registry = GroupRegistry::new();
        let loader = Arc::new(FnLoader::new(|key: &str| Ok(key.as_bytes().to_vec())));

        let group = registry.create_group("scores", 1024, loader.clone());
        assert_eq!(registry.find("scores").unwrap().name(), group.name());
        assert_eq!(registry.find("unknown").is_none(), true);

        // Re-registering a name replaces the previous group...
        let replacement = registry.create_group("scores", 1024, loader);
        replacement.main_cache.insert("marker", "1".into());
        assert_eq!(registry.find("scores").unwrap().stats().entries, 1);

        assert_eq!(registry.group_names(), vec!["scores".to_owned()]);
    }
}
