//! The seams between the cache core and the cluster transport.
//!
//! The read path of a [Group](crate::group::Group) never talks to the network directly. It only
//! consumes these two traits: a [PeerPicker] decides whether a key is owned by a remote node
//! and a [PeerGetter] fetches a value from such a node. The HTTP pool in [crate::http] is one
//! implementation of both; tests provide their own.
use std::sync::Arc;

use async_trait::async_trait;

/// Fetches raw values from one remote cluster node.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Retrieves the value for `key` within `group` from the remote node.
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Selects the remote owner of a key, if there is one.
pub trait PeerPicker: Send + Sync {
    /// Returns the getter for the remote node owning `key`.
    ///
    /// `None` signals that the key is to be handled locally - either because no peers are
    /// known or because this node itself is the owner.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}
