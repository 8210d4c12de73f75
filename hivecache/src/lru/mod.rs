//! Provides a size constrained LRU cache.
//!
//! An LRU cache drops the least recently used entry if it is about to grow beyond the given
//! byte limit. The [LruCache] engine is generic over all values implementing the
//! [ByteSize](crate::byteview::ByteSize) trait and performs no locking of its own.
//!
//! The [cache](cache) module wraps the engine into the lazily initialized, mutex-serialized
//! [MainCache](cache::MainCache) used by every cache group.
pub mod cache;
mod lru_cache;

pub use lru_cache::EvictionCallback;
pub use lru_cache::LruCache;
