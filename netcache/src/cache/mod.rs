//! Cache Module
//!
//! Provides the caching layers:
//! - TTL: expiring typed cache for small structured values
//! - Adaptive: byte-budgeted LRU cache with compression offload
//! - Memoized: wrapper bundling a TTL cache with a key generator and fetcher

pub mod adaptive;
pub mod memoize;
pub mod ttl;

pub use adaptive::{AdaptiveCache, AdaptiveCacheConfig, CacheEntry, DeviceProfile};
pub use memoize::Memoized;
pub use ttl::{TtlCache, TtlCacheConfig};
