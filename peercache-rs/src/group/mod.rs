//! Provides groups, the externally visible cache namespaces.
//!
//! A [Group](Group) combines a size constrained [LRU cache](crate::lru::LRUCache), a
//! [Getter](Getter) which loads missing values from the underlying data source and optionally a
//! [PeerPicker](crate::peers::PeerPicker) which determines the node owning a key.
//!
//! # Loading values
//!
//! A lookup via [Group::get](Group::get) is resolved as follows:
//! 1. Empty keys are rejected.
//! 2. If the key is present in the local cache, the cached value is returned.
//! 3. Otherwise the key is loaded. Concurrent loads of the same key are coalesced so that only a
//!    single load is performed while all other callers wait for its result.
//! 4. If a peer picker is present and a remote node owns the key, the value is fetched from
//!    this node. The result is **not** cached locally, as the owner already does so.
//! 5. If there is no owner, the local node is the owner or the remote fetch failed, the getter is
//!    invoked. A successful result is stored in the cache, an error is handed to all waiting
//!    callers without being cached.
//!
//! Requests of other nodes are answered via [Group::get_for_peer](Group::get_for_peer) which
//! never performs another remote hop.
//!
//! # Example
//!
//! ```
//! # use peercache::group::Group;
//! # #[tokio::main]
//! # async fn main() {
//! let group = Group::builder("scores")
//!     .max_memory(2 << 10)
//!     .getter_fn(|key| match key {
//!         "Tom" => Ok(b"630".to_vec()),
//!         _ => Err(anyhow::anyhow!("{} not exist", key)),
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
//! assert_eq!(group.get("Unknown").await.is_err(), true);
//! # }
//! ```
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use crate::average::Average;
use crate::byteview::ByteView;
use crate::lru::LRUCache;
use crate::peers::{PeerGetter, PeerPicker};
use crate::singleflight::{Cancelled, SingleFlight};

mod getter;
mod registry;

pub use getter::Getter;
pub use registry::{install, Registry};

/// Enumerates the errors which can occur when reading from a group.
#[derive(Clone, Debug)]
pub enum CacheError {
    /// Signals that an empty key was requested.
    InvalidKey,

    /// Represents an invalid setup (e.g. a group without getter or registering peers twice).
    Configuration(String),

    /// Signals that no group with the given name is known.
    UnknownGroup(String),

    /// Represents an error reported by the getter of a group.
    Source(Arc<anyhow::Error>),

    /// Represents an error while fetching a value from a peer.
    ///
    /// Note that [Group::get](Group::get) never reports this, as it falls back to the local
    /// getter.
    Remote(Arc<anyhow::Error>),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::InvalidKey => write!(f, "key is required"),
            CacheError::Configuration(message) => write!(f, "configuration error: {}", message),
            CacheError::UnknownGroup(name) => write!(f, "no such group: {}", name),
            CacheError::Source(error) => write!(f, "{:#}", error),
            CacheError::Remote(error) => write!(f, "remote fetch failed: {:#}", error),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CacheError::Source(error) | CacheError::Remote(error) => Some(&***error),
            _ => None,
        }
    }
}

impl From<Cancelled> for CacheError {
    fn from(cancelled: Cancelled) -> Self {
        CacheError::Source(Arc::new(anyhow::Error::new(cancelled)))
    }
}

/// Provides a snapshot of the metrics of the cache of a group.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheStats {
    /// Contains the number of cached entries.
    pub entries: usize,
    /// Contains the number of bytes occupied by keys and values.
    pub allocated_memory: usize,
    /// Contains the memory budget (0 means unbounded).
    pub max_memory: usize,
    /// Contains the number of lookups.
    pub reads: usize,
    /// Contains the number of inserts.
    pub writes: usize,
    /// Contains the number of entries evicted due to memory pressure.
    pub evictions: usize,
    /// Contains the hit rate in percent.
    pub hit_rate: f32,
}

/// Represents a named cache namespace.
pub struct Group {
    name: String,
    getter: Arc<dyn Getter>,
    cache: Mutex<LRUCache<ByteView>>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    loader: SingleFlight<String, ByteView, CacheError>,
    local_loader: SingleFlight<String, ByteView, CacheError>,
    local_loads: AtomicU64,
    peer_loads: AtomicU64,
    peer_errors: AtomicU64,
    peer_latency: Average,
}

/// Collects the settings of a new [Group](Group).
pub struct GroupBuilder {
    name: String,
    max_memory: usize,
    getter: Option<Arc<dyn Getter>>,
}

impl GroupBuilder {
    /// Specifies the memory budget of the cache in bytes.
    ///
    /// By default (or when 0 is given), the cache is unbounded.
    pub fn max_memory(mut self, max_memory: usize) -> Self {
        self.max_memory = max_memory;
        self
    }

    /// Specifies the getter which loads missing values.
    pub fn getter(mut self, getter: impl Getter + 'static) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Specifies a plain function or closure as getter.
    pub fn getter_fn<F>(self, getter: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.getter(getter)
    }

    /// Specifies a getter which is shared with other groups or components.
    pub fn shared_getter(mut self, getter: Arc<dyn Getter>) -> Self {
        self.getter = Some(getter);
        self
    }

    /// Creates the group.
    ///
    /// # Errors
    /// Fails with a **Configuration** error if no name or no getter was given.
    pub fn build(self) -> Result<Arc<Group>, CacheError> {
        if self.name.is_empty() {
            return Err(CacheError::Configuration(
                "a group requires a name".to_owned(),
            ));
        }

        let getter = self.getter.ok_or_else(|| {
            CacheError::Configuration(format!("no getter was given for group {}", self.name))
        })?;

        Ok(Arc::new(Group {
            name: self.name,
            getter,
            cache: Mutex::new(LRUCache::new(self.max_memory)),
            peers: OnceLock::new(),
            loader: SingleFlight::new(),
            local_loader: SingleFlight::new(),
            local_loads: AtomicU64::new(0),
            peer_loads: AtomicU64::new(0),
            peer_errors: AtomicU64::new(0),
            peer_latency: Average::new(),
        }))
    }
}

impl Group {
    /// Starts building a group with the given name.
    pub fn builder(name: impl Into<String>) -> GroupBuilder {
        GroupBuilder {
            name: name.into(),
            max_memory: 0,
            getter: None,
        }
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches the peer picker which determines the owner of each key.
    ///
    /// # Errors
    /// A group accepts a peer picker only once. Any further attempt results in a
    /// **Configuration** error.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) -> Result<(), CacheError> {
        self.peers.set(peers).map_err(|_| {
            CacheError::Configuration(format!(
                "peers have already been registered for group {}",
                self.name
            ))
        })
    }

    /// Returns the value for the given key.
    ///
    /// See the [module documentation](crate::group) for a description of the algorithm.
    pub async fn get(&self, key: &str) -> Result<ByteView, CacheError> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }

        if let Some(value) = self.lookup_cache(key) {
            log::debug!("[{}] cache hit for {}", self.name, key);
            return Ok(value);
        }

        self.load(key).await
    }

    /// Returns the value for the given key on behalf of another node.
    ///
    /// In contrast to [get](Group::get) this never asks another peer, as the calling node already
    /// determined that this node owns the key. A missing value is therefore loaded via the
    /// getter.
    pub async fn get_for_peer(&self, key: &str) -> Result<ByteView, CacheError> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }

        if let Some(value) = self.lookup_cache(key) {
            log::debug!("[{}] cache hit for {} (peer request)", self.name, key);
            return Ok(value);
        }

        self.get_locally(key).await
    }

    fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    async fn load(&self, key: &str) -> Result<ByteView, CacheError> {
        self.loader
            .call(key.to_owned(), || async move {
                if let Some(peer) = self.peers.get().and_then(|peers| peers.pick_peer(key)) {
                    match self.get_from_peer(peer.as_ref(), key).await {
                        Ok(value) => return Ok(value),
                        Err(error) => {
                            log::warn!(
                                "[{}] failed to fetch {} from {}: {}. Loading locally...",
                                self.name,
                                key,
                                peer.address(),
                                error
                            );
                        }
                    }
                }

                self.get_locally(key).await
            })
            .await
    }

    async fn get_from_peer(
        &self,
        peer: &dyn PeerGetter,
        key: &str,
    ) -> Result<ByteView, CacheError> {
        log::debug!("[{}] fetching {} from {}", self.name, key, peer.address());

        let watch = Instant::now();
        let result = peer.get(&self.name, key).await;
        self.peer_latency.add_duration(watch.elapsed());

        match result {
            Ok(data) => {
                let _ = self.peer_loads.fetch_add(1, Ordering::Relaxed);
                Ok(ByteView::from(data))
            }
            Err(error) => {
                let _ = self.peer_errors.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Remote(Arc::new(error)))
            }
        }
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView, CacheError> {
        self.local_loader
            .call(key.to_owned(), || async move {
                log::debug!("[{}] invoking getter for {}", self.name, key);
                let _ = self.local_loads.fetch_add(1, Ordering::Relaxed);

                match self.getter.get(key).await {
                    Ok(data) => {
                        // The getter handed over its buffer, therefore nobody else can modify it...
                        let value = ByteView::from(data);
                        self.populate_cache(key, value.clone());

                        Ok(value)
                    }
                    Err(error) => Err(CacheError::Source(Arc::new(error))),
                }
            })
            .await
    }

    fn populate_cache(&self, key: &str, value: ByteView) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key.to_owned(), value);
    }

    /// Returns a snapshot of the cache metrics.
    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: cache.len(),
            allocated_memory: cache.allocated_memory(),
            max_memory: cache.max_memory(),
            reads: cache.reads(),
            writes: cache.writes(),
            evictions: cache.evictions(),
            hit_rate: cache.hit_rate(),
        }
    }

    /// Returns the number of getter invocations.
    pub fn local_loads(&self) -> u64 {
        self.local_loads.load(Ordering::Relaxed)
    }

    /// Returns the number of values which were successfully fetched from peers.
    pub fn peer_loads(&self) -> u64 {
        self.peer_loads.load(Ordering::Relaxed)
    }

    /// Returns the number of failed peer fetches.
    pub fn peer_errors(&self) -> u64 {
        self.peer_errors.load(Ordering::Relaxed)
    }

    /// Returns the average latency of peer fetches.
    pub fn peer_latency(&self) -> &Average {
        &self.peer_latency
    }
}

#[cfg(test)]
mod tests {
    use crate::group::{CacheError, Getter, Group};
    use crate::peers::{PeerGetter, PeerPicker};
    use crate::testing::test_async;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Simulates a slow database which counts how often each key was loaded.
    struct SlowDb {
        records: HashMap<&'static str, &'static str>,
        loads: Mutex<HashMap<String, usize>>,
    }

    impl SlowDb {
        fn new() -> Arc<Self> {
            Arc::new(SlowDb {
                records: [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
                    .into_iter()
                    .collect(),
                loads: Mutex::new(HashMap::new()),
            })
        }

        fn loads(&self, key: &str) -> usize {
            self.loads.lock().unwrap().get(key).copied().unwrap_or(0)
        }
    }

    #[async_trait::async_trait]
    impl Getter for SlowDb {
        async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            *self.loads.lock().unwrap().entry(key.to_owned()).or_insert(0) += 1;
            tokio::time::sleep(Duration::from_millis(10)).await;

            match self.records.get(key) {
                Some(value) => Ok(value.as_bytes().to_vec()),
                None => Err(anyhow::anyhow!("{} not exist", key)),
            }
        }
    }

    /// Represents a peer which either always fails or answers with a fixed value.
    struct FakePeer {
        value: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PeerGetter for FakePeer {
        async fn get(&self, _group: &str, _key: &str) -> anyhow::Result<Bytes> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.value {
                Some(value) => Ok(Bytes::from_static(value.as_bytes())),
                None => Err(anyhow::anyhow!("server returned: 500 Internal Server Error")),
            }
        }

        fn address(&self) -> &str {
            "http://fake-peer:8001"
        }
    }

    /// Always picks the given peer (or none at all).
    struct FixedPicker(Option<Arc<FakePeer>>);

    impl PeerPicker for FixedPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            self.0
                .as_ref()
                .map(|peer| peer.clone() as Arc<dyn PeerGetter>)
        }
    }

    fn fake_peer(value: Option<&'static str>) -> Arc<FakePeer> {
        Arc::new(FakePeer {
            value,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn values_are_read_through_and_cached() {
        test_async(async {
            let db = SlowDb::new();
            let group = Group::builder("scores")
                .max_memory(2 << 10)
                .shared_getter(db.clone())
                .build()
                .unwrap();

            for (key, value) in [("Tom", "630"), ("Jack", "589"), ("Sam", "567")] {
                assert_eq!(group.get(key).await.unwrap().to_string(), value);
                assert_eq!(group.get(key).await.unwrap().to_string(), value);
                assert_eq!(db.loads(key), 1);
            }

            assert_eq!(group.local_loads(), 3);
            assert_eq!(group.cache_stats().entries, 3);
        });
    }

    #[test]
    fn getter_errors_are_not_cached() {
        test_async(async {
            let db = SlowDb::new();
            let group = Group::builder("scores")
                .shared_getter(db.clone())
                .build()
                .unwrap();

            match group.get("unknown").await {
                Err(CacheError::Source(error)) => assert_eq!(error.to_string(), "unknown not exist"),
                other => panic!("Unexpected result: {:?}", other),
            }
            assert_eq!(group.get("unknown").await.is_err(), true);
            assert_eq!(db.loads("unknown"), 2);
            assert_eq!(group.cache_stats().entries, 0);
        });
    }

    #[test]
    fn empty_keys_are_rejected() {
        test_async(async {
            let db = SlowDb::new();
            let group = Group::builder("scores")
                .shared_getter(db.clone())
                .build()
                .unwrap();

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
            let stats = group.cache_stats();
            assert_eq!(stats.entries, 1);

            assert!(matches!(group.get("").await, Err(CacheError::InvalidKey)));
            assert!(matches!(
                group.get_for_peer("").await,
                Err(CacheError::InvalidKey)
            ));

            // Neither the cache nor its metrics have been touched...
            assert_eq!(group.cache_stats(), stats);
            assert_eq!(group.local_loads(), 1);
            assert_eq!(db.loads(""), 0);
        });
    }

    #[test]
    fn concurrent_misses_invoke_the_getter_once() {
        test_async(async {
            let db = SlowDb::new();
            let group = Group::builder("scores")
                .shared_getter(db.clone())
                .build()
                .unwrap();

            let results = futures::future::join_all((0..10).map(|_| group.get("Tom"))).await;
            for result in results {
                assert_eq!(result.unwrap().to_string(), "630");
            }
            assert_eq!(db.loads("Tom"), 1);
        });
    }

    #[test]
    fn failing_peers_fall_back_to_the_getter() {
        test_async(async {
            let db = SlowDb::new();
            let group = Group::builder("scores")
                .shared_getter(db.clone())
                .build()
                .unwrap();
            let peer = fake_peer(None);
            group
                .register_peers(Arc::new(FixedPicker(Some(peer.clone()))))
                .unwrap();

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
            assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
            assert_eq!(db.loads("Tom"), 1);
            assert_eq!(group.peer_errors(), 1);

            // The locally loaded value has been cached...
            assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
            assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn values_of_peers_are_not_cached_locally() {
        test_async(async {
            let db = SlowDb::new();
            let group = Group::builder("scores")
                .shared_getter(db.clone())
                .build()
                .unwrap();
            let peer = fake_peer(Some("remote-630"));
            group
                .register_peers(Arc::new(FixedPicker(Some(peer.clone()))))
                .unwrap();

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "remote-630");
            assert_eq!(group.get("Tom").await.unwrap().to_string(), "remote-630");

            assert_eq!(peer.calls.load(Ordering::SeqCst), 2);
            assert_eq!(group.peer_loads(), 2);
            assert_eq!(group.peer_latency().count(), 2);
            assert_eq!(db.loads("Tom"), 0);
            assert_eq!(group.cache_stats().entries, 0);
        });
    }

    #[test]
    fn peer_requests_never_hop_again() {
        test_async(async {
            let db = SlowDb::new();
            let group = Group::builder("scores")
                .shared_getter(db.clone())
                .build()
                .unwrap();
            let peer = fake_peer(Some("remote-630"));
            group
                .register_peers(Arc::new(FixedPicker(Some(peer.clone()))))
                .unwrap();

            assert_eq!(group.get_for_peer("Tom").await.unwrap().to_string(), "630");
            assert_eq!(peer.calls.load(Ordering::SeqCst), 0);

            // The value is now cached, therefore even a client request is answered locally...
            assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
            assert_eq!(peer.calls.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn without_owner_the_getter_is_used() {
        test_async(async {
            let group = Group::builder("scores")
                .getter_fn(|key| Ok(key.to_uppercase().into_bytes()))
                .build()
                .unwrap();
            group.register_peers(Arc::new(FixedPicker(None))).unwrap();

            assert_eq!(group.get("tom").await.unwrap().to_string(), "TOM");
            assert_eq!(group.peer_loads(), 0);
            assert_eq!(group.local_loads(), 1);
        });
    }

    #[test]
    fn peers_can_only_be_registered_once() {
        let group = Group::builder("scores")
            .getter_fn(|_| Ok(Vec::new()))
            .build()
            .unwrap();

        assert_eq!(
            group
                .register_peers(Arc::new(FixedPicker(None)))
                .is_ok(),
            true
        );
        assert!(matches!(
            group.register_peers(Arc::new(FixedPicker(None))),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn groups_require_a_getter() {
        assert!(matches!(
            Group::builder("scores").build(),
            Err(CacheError::Configuration(_))
        ));
        assert!(matches!(
            Group::builder("")
                .getter_fn(|_| Ok(Vec::new()))
                .build(),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn cache_respects_memory_budget() {
        test_async(async {
            let group = Group::builder("scores")
                .max_memory(16)
                .getter_fn(|key| Ok(vec![b'x'; key.len() * 2]))
                .build()
                .unwrap();

            for key in ["aaaa", "bbbb", "cccc"] {
                let _ = group.get(key).await.unwrap();
            }

            let stats = group.cache_stats();
            assert!(stats.allocated_memory <= 16);
            assert_eq!(stats.entries, 1);
            assert_eq!(stats.evictions, 2);
        });
    }
}
