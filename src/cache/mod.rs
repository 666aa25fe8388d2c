// Cache module - durable, versioned, TTL-based snapshots of rooms and labels
mod backend;
mod storage;

pub use backend::{FileStore, KeyValueStore, MemoryStore};
pub use storage::{CacheConfig, CachedData, LocalCache};
