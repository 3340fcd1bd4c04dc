// Cache Module
// Content-addressed build state cache: keys, entries, stores and coordination

pub mod coordinator;
pub mod entry;
pub mod key;
pub mod store;

pub use coordinator::{CacheCoordinator, CacheLookup, CachePersistOutcome, CacheStatus};
pub use entry::CacheEntry;
pub use key::{hash_lockfile, CacheKey, LockfileHash};
pub use store::{default_cache_dir, CacheStore, FsCacheStore, MemoryCacheStore};
