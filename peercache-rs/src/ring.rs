//! Provides a consistent hash ring which maps keys to peers.
//!
//! Each peer is placed on the ring several times (these positions are called **virtual nodes**).
//! The position of a virtual node is the hash of the replica index followed by the peer name
//! (e.g. `"0http://10.0.0.1:8001"`, `"1http://10.0.0.1:8001"`...). A key is owned by the first
//! virtual node whose hash is greater than or equal to the hash of the key, wrapping around to
//! the beginning of the ring.
//!
//! Adding or removing a peer only moves the keys of the affected virtual nodes, all other keys
//! keep their owner.
//!
//! The ring is kept in an **ArcSwap**. Readers therefore never block and always observe a
//! consistent state. Writers build a complete replacement and publish it in one step.
//!
//! # Examples
//! ```
//! # use peercache::ring::HashRing;
//! let ring = HashRing::new(50);
//! assert_eq!(ring.get("Tom"), None);
//!
//! ring.add(&["http://node1:8001", "http://node2:8001"]);
//! let owner = ring.get("Tom").unwrap();
//!
//! // The owner of a key is stable...
//! assert_eq!(ring.get("Tom").unwrap(), owner);
//! ```
use arc_swap::ArcSwap;
use fnv::FnvHashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Describes the signature of the hash function used to place nodes and keys on the ring.
pub type HashFunction = fn(&[u8]) -> u32;

/// Contains the number of virtual nodes used per peer if nothing else is configured.
pub const DEFAULT_REPLICAS: usize = 50;

#[derive(Default)]
struct RingState {
    hashes: Vec<u32>,
    owners: FnvHashMap<u32, String>,
}

/// Represents a consistent hash ring of peers.
pub struct HashRing {
    replicas: usize,
    hash: HashFunction,
    state: ArcSwap<RingState>,
    write_lock: Mutex<()>,
}

impl HashRing {
    /// Creates an empty ring which places each peer **replicas** times.
    ///
    /// The ring uses CRC-32 (IEEE) to compute hashes.
    pub fn new(replicas: usize) -> Self {
        HashRing::with_hash_function(replicas, crc32fast::hash)
    }

    /// Creates an empty ring which uses the given hash function.
    pub fn with_hash_function(replicas: usize, hash: HashFunction) -> Self {
        HashRing {
            replicas,
            hash,
            state: ArcSwap::new(Arc::new(RingState::default())),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the number of virtual nodes per peer.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    fn virtual_nodes<'a>(&'a self, peer: &'a str) -> impl Iterator<Item = u32> + 'a {
        (0..self.replicas).map(move |index| (self.hash)(format!("{}{}", index, peer).as_bytes()))
    }

    /// Adds the given peers to the ring.
    ///
    /// Note that if two virtual nodes collide (have the same hash), the one added last wins. The
    /// list of hashes never contains duplicates.
    pub fn add<S: AsRef<str>>(&self, peers: &[S]) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state.load();

        let mut owners = current.owners.clone();
        for peer in peers {
            let peer = peer.as_ref();
            for hash in self.virtual_nodes(peer) {
                let _ = owners.insert(hash, peer.to_owned());
            }
        }

        self.publish(owners);
    }

    /// Removes the given peer from the ring.
    ///
    /// Virtual nodes which aren't present (anymore) are skipped.
    pub fn remove(&self, peer: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state.load();

        let mut owners = current.owners.clone();
        for hash in self.virtual_nodes(peer) {
            if owners.get(&hash).map(|owner| owner == peer).unwrap_or(false) {
                let _ = owners.remove(&hash);
            }
        }

        self.publish(owners);
    }

    fn publish(&self, owners: FnvHashMap<u32, String>) {
        let mut hashes: Vec<u32> = owners.keys().copied().collect();
        hashes.sort_unstable();

        self.state.store(Arc::new(RingState { hashes, owners }));
    }

    /// Returns the peer which owns the given key.
    ///
    /// Returns **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<String> {
        let state = self.state.load();
        if state.hashes.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = match state.hashes.binary_search(&hash) {
            Ok(index) => index,
            Err(index) => index,
        } % state.hashes.len();

        state.owners.get(&state.hashes[index]).cloned()
    }

    /// Determines if no peer is present at all.
    pub fn is_empty(&self) -> bool {
        self.state.load().hashes.is_empty()
    }

    /// Returns the number of virtual nodes currently placed on the ring.
    pub fn len(&self) -> usize {
        self.state.load().hashes.len()
    }

    /// Returns the distinct peers which are currently placed on the ring, sorted by name.
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.state.load().owners.values().cloned().collect();
        peers.sort();
        peers.dedup();

        peers
    }
}

impl Default for HashRing {
    fn default() -> Self {
        HashRing::new(DEFAULT_REPLICAS)
    }
}

#[cfg(test)]
mod tests {
    use crate::ring::HashRing;

    /// Interprets the input as decimal number so that positions on the ring are predictable.
    fn atoi(data: &[u8]) -> u32 {
        std::str::from_utf8(data)
            .ok()
            .and_then(|str| str.parse().ok())
            .unwrap_or(0)
    }

    #[test]
    fn keys_are_mapped_to_the_next_virtual_node() {
        // Given the atoi hash function and 3 replicas, this places:
        // "6" at 6, 16, 26 / "4" at 4, 14, 24 / "2" at 2, 12, 22
        let ring = HashRing::with_hash_function(3, atoi);
        ring.add(&["6", "4", "2"]);
        assert_eq!(ring.len(), 9);

        assert_eq!(ring.get("2").unwrap(), "2");
        assert_eq!(ring.get("11").unwrap(), "2");
        assert_eq!(ring.get("23").unwrap(), "4");
        // 27 is beyond the largest virtual node, therefore we wrap around to 2...
        assert_eq!(ring.get("27").unwrap(), "2");

        // Adding "8" places nodes at 8, 18, 28 so that 27 now maps to 28...
        ring.add(&["8"]);
        assert_eq!(ring.get("2").unwrap(), "2");
        assert_eq!(ring.get("11").unwrap(), "2");
        assert_eq!(ring.get("23").unwrap(), "4");
        assert_eq!(ring.get("27").unwrap(), "8");

        // ...and removing it again restores the previous mapping.
        ring.remove("8");
        assert_eq!(ring.get("27").unwrap(), "2");
        assert_eq!(ring.peers(), vec!["2", "4", "6"]);
    }

    fn virtual_nodes_of(ring: &HashRing, peer: &str) -> usize {
        ring.state
            .load()
            .owners
            .values()
            .filter(|owner| owner.as_str() == peer)
            .count()
    }

    #[test]
    fn each_peer_owns_one_virtual_node_per_replica() {
        let ring = HashRing::with_hash_function(3, atoi);
        ring.add(&["6", "4", "2"]);
        for peer in ["6", "4", "2"] {
            assert_eq!(virtual_nodes_of(&ring, peer), 3);
        }

        let ring = HashRing::new(50);
        ring.add(&["http://a:8001", "http://b:8001", "http://c:8001"]);
        assert_eq!(ring.len(), 150);
        for peer in ["http://a:8001", "http://b:8001", "http://c:8001"] {
            assert_eq!(virtual_nodes_of(&ring, peer), 50);
        }

        // Adding a peer again neither duplicates nor moves its virtual nodes...
        ring.add(&["http://a:8001"]);
        assert_eq!(ring.len(), 150);
        assert_eq!(virtual_nodes_of(&ring, "http://a:8001"), 50);
    }

    #[test]
    fn colliding_virtual_nodes_belong_to_the_last_peer_added() {
        // Given 2 replicas, "1" is placed at 1 and 11 whereas "11" is placed at 11 and 111...
        let ring = HashRing::with_hash_function(2, atoi);
        ring.add(&["1", "11"]);

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.get("11").unwrap(), "11");
        assert_eq!(ring.get("1").unwrap(), "1");
        assert_eq!(virtual_nodes_of(&ring, "1"), 1);
        assert_eq!(virtual_nodes_of(&ring, "11"), 2);

        // Removing "1" must not remove 11, as this is owned by "11" by now...
        ring.remove("1");
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.get("1").unwrap(), "11");
        assert_eq!(ring.get("11").unwrap(), "11");
        assert_eq!(ring.get("100").unwrap(), "11");
        assert_eq!(ring.peers(), vec!["11"]);
    }

    #[test]
    fn an_empty_ring_has_no_owner() {
        let ring = HashRing::default();
        assert_eq!(ring.is_empty(), true);
        assert_eq!(ring.get("Tom"), None);

        ring.add(&["http://node1:8001"]);
        ring.remove("http://node1:8001");
        assert_eq!(ring.get("Tom"), None);

        // Removing an unknown peer is a no-op...
        ring.remove("http://unknown:8001");
        assert_eq!(ring.is_empty(), true);
    }

    #[test]
    fn mapping_is_deterministic() {
        let ring1 = HashRing::new(50);
        ring1.add(&["http://a:8001", "http://b:8001", "http://c:8001"]);
        let ring2 = HashRing::new(50);
        ring2.add(&["http://c:8001", "http://a:8001", "http://b:8001"]);

        for i in 0..1000 {
            let key = format!("key-{}", i);
            assert_eq!(ring1.get(&key), ring2.get(&key));
        }
    }

    #[test]
    fn only_keys_of_a_removed_peer_move() {
        let ring = HashRing::new(50);
        ring.add(&["http://a:8001", "http://b:8001", "http://c:8001"]);
        let before: Vec<String> = (0..1000)
            .map(|i| ring.get(&format!("key-{}", i)).unwrap())
            .collect();

        ring.remove("http://b:8001");

        let mut moved = 0;
        for (i, previous_owner) in before.iter().enumerate() {
            let owner = ring.get(&format!("key-{}", i)).unwrap();
            assert_ne!(owner, "http://b:8001");
            if &owner != previous_owner {
                // Only keys of the removed peer may change their owner...
                assert_eq!(previous_owner, "http://b:8001");
                moved += 1;
            }
        }

        // ...and there should have been some (but by far not all).
        assert!(moved > 0);
        assert!(moved < 1000);
    }
}
