//! Provides cache groups, the central component of the cache.
//!
//! A [Group](Group) is a named cache which is backed by a [Getter](Getter) (the source of truth)
//! and optionally a [PeerPicker](crate::peers::PeerPicker) which connects it to other nodes.
//!
//! Reading a value via [Group::get](Group::get) works as follows:
//! 1. If the value is present in the local cache, it is returned immediately.
//! 2. Otherwise, the value is loaded. All concurrent requests for the same key are coalesced
//!    so that only a single load is performed and its result is handed out to all callers.
//! 3. A load first asks the peer picker for the node owning the key. If there is such a peer
//!    and it delivers the value, this value is returned without being stored locally (the
//!    peer is in charge of caching it).
//! 4. If there is no peer or if the peer failed, the value is obtained from the getter,
//!    stored in the local cache and returned.
//!
//! Groups are created via a [Registry](crate::registry::Registry) which permits to look them
//! up by name later on.
//!
//! # Examples
//!
//! ```
//! # use peercache::group::GetterFunc;
//! # use peercache::registry::Registry;
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Registry::new();
//! let scores = registry.new_group(
//!     "scores",
//!     2048,
//!     GetterFunc(|key: &str| match key {
//!         "Tom" => Ok(b"630".to_vec()),
//!         _ => Err(anyhow::anyhow!("{} does not exist", key)),
//!     }),
//! );
//!
//! assert_eq!(scores.get("Tom").await.unwrap().to_string(), "630");
//! assert_eq!(scores.get("Unknown").await.is_err(), true);
//! # }
//! ```
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::byteview::ByteView;
use crate::error::{CacheError, Result};
use crate::lru::{CacheStats, SharedCache};
use crate::peers::{FetchRequest, PeerGetter, PeerPicker};
use crate::registry::Registry;
use crate::singleflight::FlightGroup;

/// Loads the value for a key from the source of truth.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Returns the value for the given key.
    ///
    /// This is only invoked if the value isn't cached and if no peer is responsible for
    /// the key. Errors are passed on to all callers waiting for this key, but are not cached.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Permits to use a plain function or closure as [Getter](Getter).
///
/// # Examples
///
/// ```
/// # use peercache::group::{Getter, GetterFunc};
/// # #[tokio::main]
/// # async fn main() {
/// let getter = GetterFunc(|key: &str| Ok(key.as_bytes().to_vec()));
/// assert_eq!(getter.get("key").await.unwrap(), b"key".to_vec());
/// # }
/// ```
pub struct GetterFunc<F>(pub F);

#[async_trait]
impl<F> Getter for GetterFunc<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key)
    }
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    cache_hits: AtomicU64,
    loads: AtomicU64,
    loads_deduplicated: AtomicU64,
    peer_loads: AtomicU64,
    peer_errors: AtomicU64,
    local_loads: AtomicU64,
    local_errors: AtomicU64,
}

fn increment(counter: &AtomicU64) {
    let _ = counter.fetch_add(1, Ordering::Relaxed);
}

/// Provides a snapshot of the counters of a [Group](Group).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// The number of valid **get** requests.
    pub gets: u64,
    /// The number of requests which were answered by the local cache.
    pub cache_hits: u64,
    /// The number of requests which had to load their value.
    pub loads: u64,
    /// The number of loads which were served by another, concurrent load of the same key.
    pub loads_deduplicated: u64,
    /// The number of values successfully fetched from peers.
    pub peer_loads: u64,
    /// The number of failed peer fetches.
    pub peer_errors: u64,
    /// The number of values successfully obtained from the getter.
    pub local_loads: u64,
    /// The number of failed getter invocations.
    pub local_errors: u64,
}

/// Represents a named, read-through cache.
///
/// Groups are shared via **Arc** and safe to use from many tasks at once.
pub struct Group {
    name: String,
    getter: Box<dyn Getter>,
    main_cache: SharedCache,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    loader: FlightGroup<Result<ByteView>>,
    counters: Counters,
}

impl Debug for Group {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("max_memory", &self.main_cache.max_memory())
            .field("has_peers", &self.peers.get().is_some())
            .finish()
    }
}

impl Group {
    pub(crate) fn new(name: &str, max_memory: usize, getter: Box<dyn Getter>) -> Self {
        Group {
            name: name.to_owned(),
            getter,
            main_cache: SharedCache::new(max_memory),
            peers: OnceLock::new(),
            loader: FlightGroup::new(),
            counters: Counters::default(),
        }
    }

    /// Creates a builder to set up a new group with the given name.
    ///
    /// # Examples
    ///
    /// ```
    /// # use peercache::group::{Group, GetterFunc};
    /// # use peercache::registry::Registry;
    /// let registry = Registry::new();
    ///
    /// // A group without getter is rejected...
    /// assert_eq!(Group::builder("scores").max_memory(1024).build(&registry).is_err(), true);
    ///
    /// let group = Group::builder("scores")
    ///     .max_memory(1024)
    ///     .getter(GetterFunc(|_: &str| Ok(b"42".to_vec())))
    ///     .build(&registry)
    ///     .unwrap();
    /// assert_eq!(group.name(), "scores");
    /// assert_eq!(registry.get_group("scores").is_some(), true);
    /// ```
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

    /// Installs the picker used to find the peer which owns a given key.
    ///
    /// # Errors
    /// The peers of a group can only be registered once. Any subsequent call fails with a
    /// [CacheError::Configuration](CacheError::Configuration).
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) -> Result<()> {
        self.peers.set(peers).map_err(|_| {
            CacheError::Configuration(format!(
                "Peers for group '{}' have already been registered.",
                self.name
            ))
        })?;

        log::info!("Registered peers for group '{}'.", self.name);
        Ok(())
    }

    /// Returns the value for the given key.
    ///
    /// # Errors
    /// Fails with [CacheError::InvalidKey](CacheError::InvalidKey) for an empty key or with
    /// [CacheError::Source](CacheError::Source) if the value had to be loaded locally and the
    /// getter failed.
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }

        increment(&self.counters.gets);
        if let Some(value) = self.main_cache.get(key) {
            log::debug!("Cache hit for '{}' in group '{}'.", key, self.name);
            increment(&self.counters.cache_hits);
            return Ok(value);
        }

        self.load(key).await
    }

    /// Loads the value for the given key, either from a peer or from the getter.
    ///
    /// Concurrent loads for the same key are coalesced into a single one. Note that this
    /// bypasses the local cache - use [get](Group::get) to read a value.
    pub async fn load(&self, key: &str) -> Result<ByteView> {
        increment(&self.counters.loads);

        let (result, shared) = self.loader.call(key, || self.load_once(key)).await;
        if shared {
            increment(&self.counters.loads_deduplicated);
        }

        result
    }

    async fn load_once(&self, key: &str) -> Result<ByteView> {
        if let Some(peer) = self.peers.get().and_then(|peers| peers.pick_peer(key)) {
            log::debug!(
                "Fetching '{}' of group '{}' from {}...",
                key,
                self.name,
                peer.address()
            );
            match self.get_from_peer(peer.as_ref(), key).await {
                Ok(value) => {
                    increment(&self.counters.peer_loads);
                    return Ok(value);
                }
                Err(error) => {
                    increment(&self.counters.peer_errors);
                    log::warn!(
                        "Failed to fetch '{}' of group '{}' from {}: {}. Loading it locally...",
                        key,
                        self.name,
                        peer.address(),
                        error
                    );
                }
            }
        }

        self.get_locally(key).await
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView> {
        match self.getter.get(key).await {
            Ok(data) => {
                increment(&self.counters.local_loads);
                let value = ByteView::from(data);
                self.populate_cache(key, value.clone());
                Ok(value)
            }
            Err(error) => {
                increment(&self.counters.local_errors);
                Err(CacheError::from_source(error))
            }
        }
    }

    async fn get_from_peer(&self, peer: &dyn PeerGetter, key: &str) -> Result<ByteView> {
        let request = FetchRequest {
            group: self.name.clone(),
            key: key.to_owned(),
        };

        let response = peer.fetch(&request).await.map_err(CacheError::from_peer)?;
        Ok(ByteView::new(response.value))
    }

    fn populate_cache(&self, key: &str, value: ByteView) {
        self.main_cache.add(key, value);
    }

    /// Provides access to the local cache of this group.
    pub fn main_cache(&self) -> &SharedCache {
        &self.main_cache
    }

    /// Returns a snapshot of the metrics of the local cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.main_cache.stats()
    }

    /// Returns a snapshot of the counters of this group.
    pub fn stats(&self) -> GroupStats {
        let counters = &self.counters;
        GroupStats {
            gets: counters.gets.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            loads: counters.loads.load(Ordering::Relaxed),
            loads_deduplicated: counters.loads_deduplicated.load(Ordering::Relaxed),
            peer_loads: counters.peer_loads.load(Ordering::Relaxed),
            peer_errors: counters.peer_errors.load(Ordering::Relaxed),
            local_loads: counters.local_loads.load(Ordering::Relaxed),
            local_errors: counters.local_errors.load(Ordering::Relaxed),
        }
    }
}

/// Collects the settings of a new [Group](Group).
///
/// This is mostly useful if the group settings are determined step by step (e.g. from the
/// system config). Otherwise [Registry::new_group](Registry::new_group) is more concise.
pub struct GroupBuilder {
    name: String,
    max_memory: usize,
    getter: Option<Box<dyn Getter>>,
}

impl GroupBuilder {
    /// Specifies the max amount of memory (keys and values) to cache in bytes (0 = unbounded).
    pub fn max_memory(mut self, max_memory: usize) -> Self {
        self.max_memory = max_memory;
        self
    }

    /// Specifies the source of truth of the group.
    pub fn getter(mut self, getter: impl Getter + 'static) -> Self {
        self.getter = Some(Box::new(getter));
        self
    }

    /// Creates the group and registers it in the given registry.
    ///
    /// # Errors
    /// Fails with a [CacheError::Configuration](CacheError::Configuration) if no getter was
    /// specified.
    pub fn build(self, registry: &Registry) -> Result<Arc<Group>> {
        match self.getter {
            Some(getter) => Ok(registry.register(Group::new(&self.name, self.max_memory, getter))),
            None => Err(CacheError::Configuration(format!(
                "Cannot create group '{}' without a getter.",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CacheError;
    use crate::group::{Getter, GetterFunc};
    use crate::peers::{FetchRequest, FetchResponse, PeerGetter, PeerPicker};
    use crate::registry::Registry;
    use crate::testing::{test_async, test_multi_threaded};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Provides a getter backed by a fixed map which counts its invocations per key.
    struct SlowDatabase {
        data: HashMap<&'static str, &'static str>,
        loads: Arc<AtomicUsize>,
    }

    impl SlowDatabase {
        fn new(loads: Arc<AtomicUsize>) -> Self {
            let mut data = HashMap::new();
            let _ = data.insert("Tom", "630");
            let _ = data.insert("Jack", "589");
            let _ = data.insert("Sam", "567");
            SlowDatabase { data, loads }
        }
    }

    #[async_trait]
    impl Getter for SlowDatabase {
        async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            match self.data.get(key) {
                Some(value) => Ok(value.as_bytes().to_vec()),
                None => Err(anyhow::anyhow!("{} does not exist", key)),
            }
        }
    }

    /// Provides a peer which either always answers with a fixed value or always fails.
    struct FakePeer {
        value: Option<&'static str>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl PeerGetter for FakePeer {
        async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<FetchResponse> {
            let _ = self.fetches.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.group, "scores");
            match self.value {
                Some(value) => Ok(FetchResponse {
                    value: Bytes::from_static(value.as_bytes()),
                }),
                None => Err(anyhow::anyhow!("Connection refused")),
            }
        }

        fn address(&self) -> &str {
            "fake-peer"
        }
    }

    struct AlwaysPick {
        peer: Arc<FakePeer>,
        picks: AtomicUsize,
    }

    impl AlwaysPick {
        fn new(value: Option<&'static str>) -> Arc<Self> {
            Arc::new(AlwaysPick {
                peer: Arc::new(FakePeer {
                    value,
                    fetches: AtomicUsize::new(0),
                }),
                picks: AtomicUsize::new(0),
            })
        }
    }

    impl PeerPicker for AlwaysPick {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            let _ = self.picks.fetch_add(1, Ordering::SeqCst);
            Some(self.peer.clone())
        }
    }

    #[test]
    fn values_are_loaded_once_and_then_cached() {
        test_async(async {
            let registry = Registry::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();
            let group = registry.new_group(
                "scores",
                1024,
                GetterFunc(move |key: &str| {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                    match key {
                        "Tom" => Ok(b"60".to_vec()),
                        _ => Err(anyhow::anyhow!("unknown key")),
                    }
                }),
            );

            assert_eq!(group.get("Tom").await.unwrap().as_ref(), b"60");
            assert_eq!(group.get("Tom").await.unwrap().as_ref(), b"60");
            assert_eq!(calls.load(Ordering::SeqCst), 1);

            let stats = group.stats();
            assert_eq!(stats.gets, 2);
            assert_eq!(stats.cache_hits, 1);
            assert_eq!(stats.local_loads, 1);
        });
    }

    #[test]
    fn empty_keys_are_rejected() {
        test_async(async {
            let registry = Registry::new();
            let loads = Arc::new(AtomicUsize::new(0));
            let group = registry.new_group("scores", 1024, SlowDatabase::new(loads.clone()));
            let picker = AlwaysPick::new(Some("1"));
            group.register_peers(picker.clone()).unwrap();

            assert!(matches!(group.get("").await, Err(CacheError::InvalidKey)));
            assert_eq!(loads.load(Ordering::SeqCst), 0);
            assert_eq!(picker.picks.load(Ordering::SeqCst), 0);
            assert_eq!(group.stats().loads, 0);
        });
    }

    #[test]
    fn failed_loads_are_reported_and_not_cached() {
        test_async(async {
            let registry = Registry::new();
            let loads = Arc::new(AtomicUsize::new(0));
            let group = registry.new_group("scores", 1024, SlowDatabase::new(loads.clone()));

            assert!(matches!(
                group.get("Unknown").await,
                Err(CacheError::Source(_))
            ));
            assert!(matches!(
                group.get("Unknown").await,
                Err(CacheError::Source(_))
            ));
            assert_eq!(loads.load(Ordering::SeqCst), 2);
            assert_eq!(group.stats().local_errors, 2);
            assert_eq!(group.main_cache().is_allocated(), false);
        });
    }

    #[test]
    fn concurrent_gets_invoke_the_getter_once() {
        test_async(async {
            let registry = Registry::new();
            let loads = Arc::new(AtomicUsize::new(0));
            let group = registry.new_group("scores", 1024, SlowDatabase::new(loads.clone()));

            let results =
                futures::future::join_all((0..10).map(|_| group.get("Jack"))).await;

            assert_eq!(loads.load(Ordering::SeqCst), 1);
            assert!(results
                .iter()
                .all(|result| result.as_ref().unwrap().to_string() == "589"));
            assert_eq!(group.stats().loads_deduplicated, 9);
        });
    }

    #[test]
    fn failed_loads_are_shared_by_all_waiting_callers() {
        test_multi_threaded(async {
            let registry = Registry::new();
            let loads = Arc::new(AtomicUsize::new(0));
            let group = registry.new_group("scores", 1024, SlowDatabase::new(loads.clone()));
            let barrier = Arc::new(tokio::sync::Barrier::new(64));

            let tasks = (0..64)
                .map(|_| {
                    let group = group.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        let _ = barrier.wait().await;
                        group.get("Unknown").await
                    })
                })
                .collect::<Vec<_>>();

            let mut causes = Vec::new();
            for task in tasks {
                match task.await.unwrap() {
                    Err(CacheError::Source(cause)) => causes.push(cause),
                    other => panic!("Expected a source error but got {:?}", other),
                }
            }

            assert_eq!(loads.load(Ordering::SeqCst), 1);
            assert_eq!(causes.len(), 64);
            assert!(causes.iter().all(|cause| Arc::ptr_eq(cause, &causes[0])));
            assert_eq!(group.stats().local_errors, 1);

            // The failure isn't kept, so the next request hits the source again...
            assert!(matches!(
                group.get("Unknown").await,
                Err(CacheError::Source(_))
            ));
            assert_eq!(loads.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn failing_peers_fall_back_to_the_getter() {
        test_async(async {
            let registry = Registry::new();
            let loads = Arc::new(AtomicUsize::new(0));
            let group = registry.new_group("scores", 1024, SlowDatabase::new(loads.clone()));
            let picker = AlwaysPick::new(None);
            group.register_peers(picker.clone()).unwrap();

            assert_eq!(group.get("Sam").await.unwrap().to_string(), "567");
            assert_eq!(picker.peer.fetches.load(Ordering::SeqCst), 1);
            assert_eq!(loads.load(Ordering::SeqCst), 1);

            // The locally loaded value is now cached, so neither the peer nor the getter is
            // asked again...
            assert_eq!(group.get("Sam").await.unwrap().to_string(), "567");
            assert_eq!(picker.peer.fetches.load(Ordering::SeqCst), 1);
            assert_eq!(loads.load(Ordering::SeqCst), 1);
            assert_eq!(group.stats().peer_errors, 1);
        });
    }

    #[test]
    fn values_fetched_from_peers_are_not_cached_locally() {
        test_async(async {
            let registry = Registry::new();
            let loads = Arc::new(AtomicUsize::new(0));
            let group = registry.new_group("scores", 1024, SlowDatabase::new(loads.clone()));
            let picker = AlwaysPick::new(Some("remote"));
            group.register_peers(picker.clone()).unwrap();

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "remote");
            assert_eq!(group.main_cache().contains("Tom"), false);
            assert_eq!(loads.load(Ordering::SeqCst), 0);

            // As nothing is cached, the next request asks the peer again...
            assert_eq!(group.get("Tom").await.unwrap().to_string(), "remote");
            assert_eq!(picker.peer.fetches.load(Ordering::SeqCst), 2);
            assert_eq!(group.stats().peer_loads, 2);
        });
    }

    #[test]
    fn peers_can_only_be_registered_once() {
        let registry = Registry::new();
        let group = registry.new_group("scores", 0, GetterFunc(|_: &str| Ok(Vec::new())));

        assert_eq!(group.register_peers(AlwaysPick::new(None)).is_ok(), true);
        assert!(matches!(
            group.register_peers(AlwaysPick::new(None)),
            Err(CacheError::Configuration(_))
        ));
    }
}
