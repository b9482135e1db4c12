//! Provides a consistent hash ring to distribute keys among peers.
//!
//! Each node is placed on the ring several times (as virtual nodes, called **replicas**) to
//! achieve an even distribution of keys. A key is owned by the first virtual node found
//! clockwise from the hash of the key. Adding or removing a node therefore only moves the keys
//! of its immediate neighbours instead of reshuffling everything.
//!
//! # Examples
//!
//! ```
//! # use peercache::hashring::HashRing;
//! let mut ring = HashRing::new(50);
//! assert_eq!(ring.get("Tom"), None);
//!
//! ring.add(["http://node-a:8001", "http://node-b:8001"]);
//!
//! // The owner of a key is stable...
//! let owner = ring.get("Tom").unwrap().to_owned();
//! assert_eq!(ring.get("Tom"), Some(owner.as_str()));
//! ```
use std::hash::Hasher;

use fnv::FnvHasher;

/// Computes the position of a value on the ring.
pub type HashFn = fn(&[u8]) -> u64;

/// Hashes the given data using FNV-1a.
pub fn fnv_hash(data: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(data);
    hasher.finish()
}

/// Maps keys to nodes via consistent hashing.
pub struct HashRing {
    replicas: usize,
    hash: HashFn,
    ring: Vec<(u64, String)>,
}

impl HashRing {
    /// Creates an empty ring which places each node **replicas** times using FNV hashing.
    pub fn new(replicas: usize) -> Self {
        HashRing::with_hash(replicas, fnv_hash)
    }

    /// Creates an empty ring which uses the given hash function.
    pub fn with_hash(replicas: usize, hash: HashFn) -> Self {
        HashRing {
            replicas: replicas.max(1),
            hash,
            ring: Vec::new(),
        }
    }

    /// Adds the given nodes to the ring.
    pub fn add<I, S>(&mut self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for node in nodes {
            let node = node.as_ref();
            for replica in 0..self.replicas {
                let position = (self.hash)(format!("{}{}", replica, node).as_bytes());
                self.ring.push((position, node.to_owned()));
            }
        }

        self.ring.sort();
    }

    /// Returns the node which owns the given key or **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }

        let position = (self.hash)(key.as_bytes());
        let index = self.ring.partition_point(|(hash, _)| *hash < position);
        let (_, node) = &self.ring[index % self.ring.len()];

        Some(node.as_str())
    }

    /// Determines if no node has been added yet.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::hashring::HashRing;
    use std::collections::HashMap;

    /// Interprets the data as decimal number so that positions on the ring are predictable.
    fn decimal_hash(data: &[u8]) -> u64 {
        std::str::from_utf8(data).unwrap().parse().unwrap()
    }

    #[test]
    fn keys_are_mapped_to_the_next_node() {
        let mut ring = HashRing::with_hash(3, decimal_hash);

        // Places the nodes at 2/12/22, 4/14/24 and 6/16/26...
        ring.add(["6", "4", "2"]);

        let cases = [("2", "2"), ("11", "2"), ("23", "4"), ("27", "2")];
        for (key, node) in cases {
            assert_eq!(ring.get(key), Some(node), "key {}", key);
        }

        // Adding 8/18/28 moves key 27 to the new node...
        ring.add(["8"]);
        assert_eq!(ring.get("27"), Some("8"));
        assert_eq!(ring.get("11"), Some("2"));
    }

    #[test]
    fn keys_are_spread_across_nodes() {
        let mut ring = HashRing::new(50);
        ring.add(["http://a", "http://b", "http://c"]);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for i in 0..3000 {
            *counts.entry(ring.get(&format!("key-{}", i)).unwrap()).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|count| *count > 100));
    }
}
