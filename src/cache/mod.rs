// Cache module: generic TTL/LRU cache and the model cache
// Author: kelexine (https://github.com/kelexine)

pub mod ttl;
pub mod model_cache;
pub mod models;

pub use ttl::{Sizer, TtlCache};
pub use model_cache::{ModelCache, ModelCacheEntry, ModelHandle};
pub use models::{CacheEntry, CacheLookup, CacheStats, EntryDiagnostics, Metadata};
