use linked_hash_map::LinkedHashMap;

use crate::byteview::ByteSize;

/// Invoked for each entry which is dropped due to the size constraint.
///
/// The callback receives the evicted key and value by ownership, after all internal bookkeeping
/// for the entry has been completed.
pub type EvictionCallback<V> = Box<dyn FnMut(String, V) + Send>;

/// Provides a size constrained LRU cache.
///
/// A cache behaves just like a map as long as there is no shortage in storage. Once the memory
/// allocated by keys and values grows beyond the configured limit, the least recently used
/// entries are dropped until the limit is honored again - hence the name LRU cache.
///
/// The accounted size of an entry is the byte length of its key plus the
/// [allocated_size](crate::byteview::ByteSize::allocated_size) of its value. Including the key
/// matters: a workload with long keys and tiny values would otherwise grow without bound.
///
/// A limit of `0` disables the constraint entirely, turning this into a plain recency-ordered
/// map.
///
/// Note that the cache itself performs no locking at all. Concurrent callers have to serialize
/// access, which is the job of [MainCache](crate::lru::cache::MainCache).
///
/// # Examples
/// ```
/// # use hivecache::lru::LruCache;
/// // Provides room for 20 bytes of keys and values...
/// let mut lru = LruCache::new(20);
///
/// lru.put("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit..
/// lru.put("Foo1".to_owned(), "Bar1".to_owned());
/// assert_eq!(lru.len(), 2);
///
/// // this exceeds the limit and therefore throws the least recently used entry out:
/// lru.put("Foo2".to_owned(), "Bar2".to_owned());
/// assert_eq!(lru.get("Foo").is_some(), false);
/// assert_eq!(lru.get("Foo1").is_some(), true);
/// assert_eq!(lru.get("Foo2").is_some(), true);
/// ```
pub struct LruCache<V: ByteSize> {
    max_bytes: usize,
    used_bytes: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    map: LinkedHashMap<String, V>,
    on_evicted: Option<EvictionCallback<V>>,
}

impl<V: ByteSize> LruCache<V> {
    /// Creates a new cache which may allocate up to `max_bytes` for its keys and values.
    ///
    /// A limit of `0` imposes no constraint at all.
    pub fn new(max_bytes: usize) -> Self {
        LruCache {
            max_bytes,
            used_bytes: 0,
            reads: 0,
            hits: 0,
            writes: 0,
            map: LinkedHashMap::new(),
            on_evicted: None,
        }
    }

    /// Installs a callback which is notified for each entry evicted due to the size constraint.
    ///
    /// The callback runs synchronously within the mutation that caused the eviction and only
    /// after the entry has been fully removed from the internal bookkeeping.
    pub fn set_eviction_callback(&mut self, callback: impl FnMut(String, V) + Send + 'static) {
        self.on_evicted = Some(Box::new(callback));
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced and the entry is treated as the
    /// most recently used one. Afterwards, least recently used entries are evicted until the
    /// memory constraint is honored. Note that there is no special treatment for an entry which
    /// is larger than the whole cache: it is stored and eviction then shrinks the cache until
    /// the constraint holds, which may very well drop the entry itself again.
    pub fn put(&mut self, key: String, value: V) {
        self.writes += 1;

        let key_size = key.len();
        let value_size = value.allocated_size();

        // LinkedHashMap::insert re-positions a replaced key at the back, which is exactly the
        // recency update required for an in-place update.
        match self.map.insert(key, value) {
            Some(previous) => {
                self.used_bytes -= previous.allocated_size();
                self.used_bytes += value_size;
            }
            None => self.used_bytes += key_size + value_size,
        }

        while self.max_bytes != 0 && self.used_bytes > self.max_bytes {
            self.remove_oldest();
        }
    }

    /// Returns the value which has previously been stored for the given key or `None` if no
    /// value is present.
    ///
    /// A successful lookup marks the entry as most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        match self.map.get_refresh(key) {
            Some(value) => {
                self.hits += 1;
                Some(value)
            }
            None => None,
        }
    }

    /// Removes the least recently used entry if the cache is non-empty.
    ///
    /// The eviction callback (if installed) observes the removed pair once all counters have
    /// been updated.
    pub fn remove_oldest(&mut self) {
        if let Some((key, value)) = self.map.pop_front() {
            self.used_bytes -= key.len() + value.allocated_size();

            if let Some(callback) = self.on_evicted.as_mut() {
                callback(key, value);
            }
        }
    }

    /// Returns the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the memory (in bytes) currently allocated by all keys and values.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Returns the maximal amount of memory to be occupied by this cache (0 = unbounded).
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Specifies the maximal amount of memory to be occupied by this cache.
    ///
    /// Shrinking the limit below the currently used size immediately evicts entries until the
    /// new limit is honored.
    pub fn set_max_bytes(&mut self, max_bytes: usize) {
        self.max_bytes = max_bytes;

        while self.max_bytes != 0 && self.used_bytes > self.max_bytes {
            self.remove_oldest();
        }
    }

    /// Returns the total number of reads performed on this cache.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the total number of writes performed on this cache.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the cache hit rate in percent.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            reads => self.hits as f32 / reads as f32 * 100.,
        }
    }
}
