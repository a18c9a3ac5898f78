//! Provides a size constrained LRU Cache.
//!
//! An LRU cache drops the least recently used entry once it is about to grow beyond its memory
//! budget. Each [group](crate::group::Group) owns one of these caches and keeps all values which
//! it loaded locally in there.
//!
//! The cache stores all kinds of values for which the [ByteSize](ByteSize) trait is implemented.
//! The size charged for an entry is the length of its key plus the size reported by its value.
//!
//! Note that the cache itself isn't synchronized. A group wraps it in a mutex which is only ever
//! held for a single lookup or insert and never across I/O.
mod lru_cache;

pub use lru_cache::ByteSize;
pub use lru_cache::LRUCache;
