//! Provides the consistent hash ring which assigns each key to its owning cluster node.
//!
//! Every node contributes a fixed number of virtual points to the ring. A key is owned by the
//! node whose next virtual point follows the key's hash clockwise on the ring. This keeps the
//! assignment stable when nodes join: only the keys between a new virtual point and its
//! predecessor change owners, all other keys stay put.
//!
//! All nodes of a cluster MUST agree on the hash function, the replica count and the exact
//! peer identifier strings. Otherwise two nodes will disagree about which of them owns a key
//! and peer requests will bounce.
use std::collections::HashMap;

use crc::{Crc, CRC_32_ISO_HDLC};

lazy_static::lazy_static! {
    /// CRC-32 (IEEE polynomial), the default ring hash.
    static ref CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
}

/// A pluggable ring hash function.
///
/// This mainly exists so that tests can use trivial, predictable hashes. Production clusters
/// should stick to the default.
pub type RingHash = Box<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Maps keys to peer identifiers using a ring of virtual points.
pub struct HashRing {
    replicas: usize,
    hash: RingHash,
    points: Vec<u32>,
    peers: HashMap<u32, String>,
}

impl HashRing {
    /// Creates a ring where each peer contributes `replicas` virtual points.
    ///
    /// If no hash function is given, CRC-32 (IEEE) is used.
    pub fn new(replicas: usize, hash: Option<RingHash>) -> Self {
        HashRing {
            replicas,
            hash: hash.unwrap_or_else(|| Box::new(|data| CRC32.checksum(data))),
            points: Vec::new(),
            peers: HashMap::new(),
        }
    }

    /// Adds the given peers to the ring.
    ///
    /// For each peer, `replicas` virtual points are derived by hashing the decimal replica
    /// index followed by the peer identifier. This derivation is part of the cluster wire
    /// contract and must not change. Should two virtual points collide on the same hash (a
    /// roughly one-in-four-billion event per pair), the point simply belongs to whichever
    /// peer was added last.
    pub fn add<S: AsRef<str>>(&mut self, peers: &[S]) {
        for peer in peers {
            let peer = peer.as_ref();
            for replica in 0..self.replicas {
                let point = (self.hash)(format!("{}{}", replica, peer).as_bytes());
                self.points.push(point);
                let _ = self.peers.insert(point, peer.to_owned());
            }
        }

        self.points.sort_unstable();
    }

    /// Returns the peer owning the given key or `None` if the ring is empty.
    ///
    /// The owner is determined via binary search for the first virtual point at or after the
    /// key's hash, wrapping around to the first point on the ring.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = self.points.partition_point(|&point| point < hash);
        let point = self.points[index % self.points.len()];

        self.peers.get(&point).map(String::as_str)
    }

    /// Determines if any peers have been added.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::ring::{HashRing, RingHash};

    /// Interprets the hashed bytes as a decimal number.
    ///
    /// With this hash, virtual points become predictable: the peer "2" with replica indices
    /// 0..3 yields the points 02, 12 and 22.
    fn decimal_hash() -> Option<RingHash> {
        Some(Box::new(|data| {
            std::str::from_utf8(data)
                .ok()
                .and_then(|number| number.parse().ok())
                .unwrap_or(0)
        }))
    }

    #[test]
    fn keys_are_assigned_to_the_expected_peers() {
        let mut ring = HashRing::new(3, decimal_hash());
        ring.add(&["6", "4", "2"]);

        // The ring now consists of the points 2, 4, 6, 12, 14, 16, 22, 24, 26...
        assert_eq!(ring.get("2"), Some("2"));
        assert_eq!(ring.get("11"), Some("2"));
        assert_eq!(ring.get("23"), Some("4"));

        // ...and keys beyond the last point wrap around to the first one.
        assert_eq!(ring.get("27"), Some("2"));
    }

    #[test]
    fn adding_a_peer_only_moves_keys_onto_that_peer() {
        let mut ring = HashRing::new(3, decimal_hash());
        ring.add(&["6", "4", "2"]);

        ring.add(&["8"]);

        // 27 now belongs to the new peer (via its point 28)...
        assert_eq!(ring.get("27"), Some("8"));

        // ...while all previously resolved keys keep their owner.
        assert_eq!(ring.get("2"), Some("2"));
        assert_eq!(ring.get("11"), Some("2"));
        assert_eq!(ring.get("23"), Some("4"));
    }

    #[test]
    fn identically_configured_rings_agree() {
        let mut first = HashRing::new(50, None);
        let mut second = HashRing::new(50, None);

        first.add(&["node-a:9010", "node-b:9010", "node-c:9010"]);
        second.add(&["node-a:9010", "node-b:9010", "node-c:9010"]);

        for index in 0..500 {
            let key = format!("key-{}", index);
            assert_eq!(first.get(&key), second.get(&key));
        }
    }

    #[test]
    fn an_empty_ring_owns_nothing() {
        let ring = HashRing::new(50, None);

        assert_eq!(ring.is_empty(), true);
        assert_eq!(ring.get("anything"), None);
    }

    #[test]
    fn colliding_points_resolve_to_the_last_peer_added() {
        // A constant hash makes every virtual point collide on 42...
        let mut ring = HashRing::new(3, Some(Box::new(|_| 42)));
        ring.add(&["first", "second"]);

        // ...which is harmless: the shared slot belongs to the peer added last.
        assert_eq!(ring.get("some-key"), Some("second"));
    }
}
