//! The error kinds surfaced by the cache API.
use std::sync::Arc;

use thiserror::Error;

/// Enumerates the failures a cache read or a configuration change can run into.
///
/// The type is cheap to clone on purpose: a single failed load is published to every caller
/// coalesced onto the same in-flight call, so the error has to fan out. Failures talking to a
/// peer never show up here at all - they are logged and answered by falling back to the local
/// loader.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// A key passed to a group read was empty.
    #[error("A cache key must not be empty")]
    EmptyKey,

    /// The cache or cluster setup was used incorrectly.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A request referenced a group which has never been registered.
    #[error("Unknown cache group: {0}")]
    UnknownGroup(String),

    /// The authoritative loader of a group failed to produce a value.
    #[error("Failed to load '{key}' from its origin: {cause}")]
    Upstream {
        /// The key which could not be loaded.
        key: String,
        /// The underlying loader error.
        cause: Arc<anyhow::Error>,
    },
}

impl CacheError {
    /// Wraps a loader failure for the given key.
    pub fn upstream(key: &str, cause: anyhow::Error) -> Self {
        CacheError::Upstream {
            key: key.to_owned(),
            cause: Arc::new(cause),
        }
    }
}
