use crate::node::Node;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Points placed on the ring for every node. All nodes carry the same weight.
pub const DEFAULT_POINTS_PER_NODE: usize = 20;

fn hash64(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

/// Consistent-hash ring keyed by node `hash_value`.
///
/// Each node occupies `points_per_node` positions derived from its identity.
/// A key belongs to the node owning the first position at or after the key's
/// hash, wrapping around at the end of the ring.
#[derive(Clone, Debug)]
pub struct HashRing {
    points: BTreeMap<u64, String>,
    nodes: HashMap<String, Node>,
    points_per_node: usize,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl HashRing {
    pub fn new() -> Self {
        Self::with_points_per_node(DEFAULT_POINTS_PER_NODE)
    }

    pub fn with_points_per_node(points_per_node: usize) -> Self {
        HashRing {
            points: BTreeMap::new(),
            nodes: HashMap::new(),
            points_per_node: points_per_node.max(1),
        }
    }

    fn point_keys<'a>(&'a self, hash_value: &'a str) -> impl Iterator<Item = u64> + 'a {
        (0..self.points_per_node).map(move |i| hash64(format!("{i}{hash_value}").as_bytes()))
    }

    /// Adds a node. Returns false if a node with the same identity is already present.
    pub fn add(&mut self, node: Node) -> bool {
        if self.nodes.contains_key(&node.hash_value) {
            return false;
        }

        let points: Vec<u64> = self.point_keys(&node.hash_value).collect();
        for point in points {
            self.points.insert(point, node.hash_value.clone());
        }
        self.nodes.insert(node.hash_value.clone(), node);
        true
    }

    /// Removes a node by identity. Returns false if it was not on the ring.
    pub fn remove(&mut self, hash_value: &str) -> bool {
        if self.nodes.remove(hash_value).is_none() {
            return false;
        }

        let points: Vec<u64> = self.point_keys(hash_value).collect();
        for point in points {
            // A colliding point may have been taken over by another node.
            if self.points.get(&point).is_some_and(|owner| owner == hash_value) {
                self.points.remove(&point);
            }
        }
        true
    }

    /// Returns the node owning `key`, or None if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&Node> {
        let hash = hash64(key.as_bytes());
        let (_, owner) = self
            .points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())?;
        self.nodes.get(owner)
    }

    pub fn contains(&self, hash_value: &str) -> bool {
        self.nodes.contains_key(hash_value)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(i: usize) -> Node {
        Node::from_address(&format!("http://10.0.0.{i}:12140")).unwrap()
    }

    fn ring_of(n: usize) -> HashRing {
        let mut ring = HashRing::new();
        for i in 1..=n {
            ring.add(node(i));
        }
        ring
    }

    fn keys() -> Vec<String> {
        (0..10_000).map(|i| format!("0:10.{}.{}.{}", i / 65536, (i / 256) % 256, i % 256)).collect()
    }

    #[test]
    fn empty_ring_owns_nothing() {
        let ring = HashRing::new();
        assert!(ring.get("0:10.0.0.1").is_none());
        assert!(ring.is_empty());
    }

    #[test]
    fn mapping_is_deterministic() {
        let a = ring_of(5);
        // Insertion order must not matter.
        let mut b = HashRing::new();
        for i in (1..=5).rev() {
            b.add(node(i));
        }

        for key in keys() {
            assert_eq!(a.get(&key), b.get(&key));
        }
    }

    #[test]
    fn duplicate_add_and_unknown_remove() {
        let mut ring = ring_of(2);
        assert!(!ring.add(node(1)));
        assert!(!ring.remove("10.0.0.9:12140"));
        assert_eq!(ring.len(), 2);
        assert!(ring.remove("10.0.0.1:12140"));
        assert!(!ring.contains("10.0.0.1:12140"));
    }

    #[test]
    fn adding_a_node_moves_a_bounded_fraction() {
        let before = ring_of(5);
        let mut after = before.clone();
        after.add(node(6));

        let keys = keys();
        let moved = keys
            .iter()
            .filter(|k| before.get(k) != after.get(k))
            .count();

        // Ideal is 1/6 of the keys; everything that moved must land on the new node.
        assert!(moved > 0);
        assert!(moved < keys.len() / 2, "moved {moved} of {}", keys.len());
        for key in &keys {
            if before.get(key) != after.get(key) {
                assert_eq!(after.get(key).unwrap().hash_value, "10.0.0.6:12140");
            }
        }
    }

    #[test]
    fn removing_a_node_only_moves_its_keys() {
        let before = ring_of(5);
        let mut after = before.clone();
        after.remove("10.0.0.3:12140");

        for key in keys() {
            let old = before.get(&key).unwrap();
            if old.hash_value != "10.0.0.3:12140" {
                assert_eq!(Some(old), after.get(&key));
            }
        }
    }

    #[test]
    fn every_node_gets_some_keys() {
        let ring = ring_of(4);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for key in keys() {
            *counts
                .entry(ring.get(&key).unwrap().hash_value.clone())
                .or_default() += 1;
        }
        assert_eq!(counts.len(), 4);
    }
}
