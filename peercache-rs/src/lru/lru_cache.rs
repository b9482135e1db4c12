use linked_hash_map::LinkedHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of memory in bytes which is accounted for this value.
    ///
    /// For the values stored by a cache group, this is the exact length of the payload. Other
    /// implementations might return an approximation, but it should represent the "largest"
    /// part of an instance (e.g. the bytes allocated on the heap).
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

/// Invoked for each entry which has been evicted to make room for new data.
///
/// Note that the callback runs synchronously within the operation which caused the eviction.
/// If the cache is guarded by a lock (as in [SharedCache](crate::lru::SharedCache)), the
/// callback must never call back into the same cache, as this would deadlock.
pub type EvictionCallback<V> = Box<dyn FnMut(String, V) + Send>;

/// Provides a size constrained LRU cache.
///
/// A cache behaves just like a **Map** as long as there is no shortage in storage. However, if
/// the memory accounted for all keys and values is above the given limit, old (least recently
/// used) entries will be evicted - hence the name LRU cache.
///
/// For each entry, the length of its key plus the [ByteSize](ByteSize) of its value is
/// accounted. A **max_memory** of 0 disables the limit altogether.
///
/// Note that this cache is not thread safe. Use [SharedCache](crate::lru::SharedCache) if
/// concurrent access is required.
///
/// # Examples
/// ```
/// # use peercache::lru::LRUCache;
/// // Specifies a cache which can store up to 1024 bytes of keys and values...
/// let mut lru = LRUCache::new(1024);
///
/// lru.put("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit..
/// lru.put("Foo1".to_owned(), "X".repeat(512));
/// assert_eq!(lru.get("Foo").is_some(), true);
/// assert_eq!(lru.get("Foo1").is_some(), true);
///
/// // this will hit the max memory constraint...
/// lru.put("Foo2".to_owned(), "X".repeat(512));
/// // ..and therefore will throw the two others out:
/// assert_eq!(lru.get("Foo").is_some(), false);
/// assert_eq!(lru.get("Foo1").is_some(), false);
/// assert_eq!(lru.get("Foo2").is_some(), true);
///```
pub struct LRUCache<V: ByteSize> {
    allocated_memory: usize,
    max_memory: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    evictions: usize,
    on_evicted: Option<EvictionCallback<V>>,
    map: LinkedHashMap<String, V>,
}

impl<V: ByteSize> LRUCache<V> {
    /// Creates a new cache which can store entries until they allocated **max_memory** bytes.
    ///
    /// Passing 0 creates an unbounded cache.
    pub fn new(max_memory: usize) -> Self {
        LRUCache {
            allocated_memory: 0,
            max_memory,
            reads: 0,
            hits: 0,
            writes: 0,
            evictions: 0,
            on_evicted: None,
            map: LinkedHashMap::new(),
        }
    }

    /// Creates a new cache just like [new](LRUCache::new) which invokes the given callback
    /// for each evicted entry.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let log = evicted.clone();
    /// let mut lru: LRUCache<String> = LRUCache::with_eviction_callback(
    ///     6,
    ///     Box::new(move |key, _value: String| log.lock().unwrap().push(key)),
    /// );
    ///
    /// lru.put("A".to_owned(), "AAA".to_owned());
    /// lru.put("B".to_owned(), "BBB".to_owned());
    /// assert_eq!(evicted.lock().unwrap().as_slice(), &["A".to_owned()]);
    /// ```
    pub fn with_eviction_callback(max_memory: usize, callback: EvictionCallback<V>) -> Self {
        let mut cache = LRUCache::new(max_memory);
        cache.on_evicted = Some(callback);
        cache
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced and the entry becomes the most
    /// recently used one. Afterwards, least recently used entries are evicted until the
    /// memory constraint is satisfied again. Note that an entry which is larger than the whole
    /// cache will therefore be evicted immediately.
    pub fn put(&mut self, key: String, value: V) {
        let key_size = key.len();
        let value_size = value.allocated_size();

        // Note that insert moves an existing entry to the most recently used end...
        match self.map.insert(key, value) {
            Some(stale_value) => {
                self.allocated_memory =
                    self.allocated_memory + value_size - stale_value.allocated_size();
            }
            None => self.allocated_memory += key_size + value_size,
        }

        self.writes += 1;
        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.max_memory != 0 && self.allocated_memory > self.max_memory {
            self.remove_oldest();
        }
    }

    /// Removes the least recently used entry.
    ///
    /// If an eviction callback is present, it is invoked with the removed key and value. Calling
    /// this on an empty cache does nothing.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(0);
    /// lru.put("A".to_owned(), "1".to_owned());
    /// lru.put("B".to_owned(), "2".to_owned());
    ///
    /// // Touching "A" makes "B" the least recently used entry...
    /// let _ = lru.get("A");
    /// lru.remove_oldest();
    /// assert_eq!(lru.get("B"), None);
    /// assert_eq!(lru.len(), 1);
    ///
    /// // An empty cache simply ignores this call...
    /// lru.remove_oldest();
    /// lru.remove_oldest();
    /// assert_eq!(lru.is_empty(), true);
    /// ```
    pub fn remove_oldest(&mut self) {
        if let Some((key, value)) = self.map.pop_front() {
            self.allocated_memory -= key.len() + value.allocated_size();
            self.evictions += 1;
            if let Some(callback) = self.on_evicted.as_mut() {
                callback(key, value);
            }
        }
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A successful lookup marks the entry as most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        match self.map.get_refresh(key) {
            Some(value) => {
                self.hits += 1;
                Some(&*value)
            }
            None => None,
        }
    }

    /// Determines if a value is present for the given key without touching the entry.
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Removes the entry for the given key if present.
    ///
    /// Note that the eviction callback is not invoked, as the entry wasn't evicted but
    /// deliberately removed.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.writes += 1;

        let value = self.map.remove(key)?;
        self.allocated_memory -= key.len() + value.allocated_size();
        Some(value)
    }

    /// Removes all entries in this cache.
    ///
    /// Note that this will also zero all metrics (reads, writes, cache hits, evictions).
    pub fn flush(&mut self) {
        self.map.clear();
        self.allocated_memory = 0;
        self.reads = 0;
        self.writes = 0;
        self.hits = 0;
        self.evictions = 0;
    }

    /// Returns the number of elements in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the maximal amount of memory to be occupied by this cache (0 = unbounded).
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Returns the amount of memory accounted for the keys and values of this cache.
    pub fn allocated_memory(&self) -> usize {
        self.allocated_memory
    }

    /// Returns the cache hit rate in percent.
    ///
    /// Note that all metrics are reset when **flush()** is called.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the total number of reads performed on this cache since the last flush.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the number of reads which found a value since the last flush.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the total number of writes performed on this cache since the last flush.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the number of entries evicted due to the memory constraint since the last flush.
    pub fn evictions(&self) -> usize {
        self.evictions
    }
}
