//! Provides a size constrained LRU Cache.
//!
//! An LRU cache drops the least recently used entry if it is about to grow beyond its memory
//! limit. For each entry, the length of the key and the [ByteSize](ByteSize) of its value is
//! accounted.
//!
//! The eviction policy itself is implemented by [LRUCache](LRUCache) which is a plain, single
//! threaded data structure. [SharedCache](SharedCache) wraps such a cache behind a lock so
//! that it can be used by many tasks at once - this is what each
//! [Group](crate::group::Group) uses to store its values.
mod lru_cache;
mod shared;

pub use lru_cache::ByteSize;
pub use lru_cache::EvictionCallback;
pub use lru_cache::LRUCache;
pub use shared::CacheStats;
pub use shared::SharedCache;
