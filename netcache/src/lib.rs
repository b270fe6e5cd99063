pub mod cache;
pub mod compression;
pub mod config;
pub mod core;
pub mod metrics;
pub mod network;
pub mod persistence;

// Re-export commonly used types
pub use cache::{
    AdaptiveCache, AdaptiveCacheConfig, CacheEntry, DeviceProfile, Memoized, TtlCache,
    TtlCacheConfig,
};
pub use compression::{CompressionAlgorithm, CompressionTransform};
pub use config::{LogFormat, LoggingConfig, NetcacheConfig, PersistenceConfig};
pub use core::{
    CacheStats, Clock, ConfigError, EntryMeta, ManualClock, NetcacheError, NetworkError,
    SharedClock, StoreError, SystemClock, TransportError, system_clock,
};
pub use network::{
    ConnectionPool, HttpMethod, HttpTransport, NetworkRequest, NetworkResponse, Priority,
    RequestScheduler, SchedulerConfig, SchedulerStats, StatusClass, StatusClassifier, Transport,
    TransportResponse,
};
pub use persistence::{FileStore, MemoryStore, PersistentStore, SharedStore};
