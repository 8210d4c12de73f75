//! Provides the thread-safe cache each group stores its values in.
//!
//! [MainCache] wraps the single-threaded [LruCache](crate::lru::LruCache) engine behind a mutex
//! so that it can be shared by all tasks reading from a group. The engine itself is constructed
//! lazily: a group which never stores anything (e.g. because all of its keys live on other
//! cluster nodes) never allocates an engine at all.
use std::sync::Mutex;

use crate::byteview::ByteView;
use crate::lru::LruCache;

/// A point-in-time snapshot of the state and metrics of a cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    /// Number of resident entries.
    pub entries: usize,
    /// Memory allocated by all resident keys and values in bytes.
    pub used_bytes: usize,
    /// Total number of reads.
    pub reads: usize,
    /// Total number of writes.
    pub writes: usize,
    /// Percentage of reads which hit a resident entry.
    pub hit_rate: f32,
}

/// The mutex-serialized, lazily initialized cache of a group.
pub struct MainCache {
    cache_bytes: usize,
    lru: Mutex<Option<LruCache<ByteView>>>,
}

impl MainCache {
    /// Creates a cache which will allow its engine to allocate up to `cache_bytes`
    /// (0 = unbounded).
    pub fn new(cache_bytes: usize) -> Self {
        MainCache {
            cache_bytes,
            lru: Mutex::new(None),
        }
    }

    /// Performs a lookup for the given key.
    ///
    /// A lookup on a cache which has never stored a value is a plain miss and does not
    /// initialize the engine.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        let mut lru = self.lru.lock().unwrap();
        lru.as_mut()?.get(key).cloned()
    }

    /// Stores the given value, initializing the engine on first use.
    ///
    /// The engine is created without an eviction callback - evictions from a group cache are
    /// silent.
    pub fn insert(&self, key: &str, value: ByteView) {
        let mut lru = self.lru.lock().unwrap();
        lru.get_or_insert_with(|| LruCache::new(self.cache_bytes))
            .put(key.to_owned(), value);
    }

    /// Provides a snapshot of the current state and metrics of this cache.
    pub fn stats(&self) -> CacheStats {
        let lru = self.lru.lock().unwrap();
        match lru.as_ref() {
            Some(lru) => CacheStats {
                entries: lru.len(),
                used_bytes: lru.used_bytes(),
                reads: lru.reads(),
                writes: lru.writes(),
                hit_rate: lru.hit_rate(),
            },
            None => CacheStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::lru::cache::MainCache;

    #[test]
    fn a_miss_does_not_initialize_the_engine() {
        let cache = MainCache::new(1024);

        assert_eq!(cache.get("unknown"), None);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().reads, 0);
    }

    #[test]
    fn values_survive_the_round_trip() {
        let cache = MainCache::new(1024);

        cache.insert("key1", ByteView::from("value1"));
        assert_eq!(cache.get("key1").unwrap().to_vec(), b"value1");
        assert_eq!(cache.get("key2"), None);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.used_bytes, 10);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 2);
    }

    #[test]
    fn the_engine_enforces_the_configured_budget() {
        let cache = MainCache::new(20);

        cache.insert("key1", ByteView::from("value1"));
        cache.insert("key2", ByteView::from("value2"));
        cache.insert("key3", ByteView::from("value3"));

        assert_eq!(cache.get("key1"), None);
        assert_eq!(cache.stats().entries, 2);
    }
}
