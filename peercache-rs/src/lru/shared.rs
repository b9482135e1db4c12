use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::byteview::ByteView;
use crate::lru::LRUCache;

/// Provides a thread safe LRU cache for [ByteView](ByteView) values.
///
/// All operations acquire a single lock for their whole duration. As neither a lookup nor an
/// insert performs any I/O, this lock is only held very briefly.
///
/// The underlying [LRUCache](LRUCache) is only allocated once the first value is stored. A group
/// which never loads anything (e.g. because all its keys are owned by peers) therefore never
/// allocates any cache structures.
///
/// # Examples
/// ```
/// # use peercache::lru::SharedCache;
/// # use peercache::byteview::ByteView;
/// let cache = SharedCache::new(1024);
/// assert_eq!(cache.get("Tom"), None);
///
/// cache.add("Tom", ByteView::from("630"));
/// assert_eq!(cache.get("Tom").unwrap().to_string(), "630");
/// ```
pub struct SharedCache {
    max_memory: usize,
    lru: Mutex<Option<LRUCache<ByteView>>>,
}

/// Provides a snapshot of the metrics of a [SharedCache](SharedCache).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// The number of entries currently stored.
    pub entries: usize,
    /// The number of bytes accounted for all keys and values.
    pub allocated_memory: usize,
    /// The configured limit in bytes (0 = unbounded).
    pub max_memory: usize,
    /// The number of lookups performed.
    pub reads: usize,
    /// The number of lookups which found a value.
    pub hits: usize,
    /// The number of entries evicted to enforce the memory limit.
    pub evictions: usize,
}

impl SharedCache {
    /// Creates a new cache which will be limited to **max_memory** bytes (0 = unbounded).
    pub fn new(max_memory: usize) -> Self {
        SharedCache {
            max_memory,
            lru: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<LRUCache<ByteView>>> {
        self.lru.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores the given value, creating the underlying LRU cache if necessary.
    pub fn add(&self, key: &str, value: ByteView) {
        self.lock()
            .get_or_insert_with(|| LRUCache::new(self.max_memory))
            .put(key.to_owned(), value);
    }

    /// Returns the value stored for the given key.
    ///
    /// Note that a lookup never creates the underlying LRU cache.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.lock().as_mut().and_then(|lru| lru.get(key).cloned())
    }

    /// Determines if a value is present for the given key without marking it as used.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().as_ref().map_or(false, |lru| lru.contains(key))
    }

    /// Returns the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, |lru| lru.len())
    }

    /// Determines if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured limit in bytes.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Determines if the underlying LRU cache has already been created.
    pub fn is_allocated(&self) -> bool {
        self.lock().is_some()
    }

    /// Returns a snapshot of the current metrics.
    pub fn stats(&self) -> CacheStats {
        match self.lock().as_ref() {
            Some(lru) => CacheStats {
                entries: lru.len(),
                allocated_memory: lru.allocated_memory(),
                max_memory: self.max_memory,
                reads: lru.reads(),
                hits: lru.hits(),
                evictions: lru.evictions(),
            },
            None => CacheStats {
                max_memory: self.max_memory,
                ..CacheStats::default()
            },
        }
    }
}
