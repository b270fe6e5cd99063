pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, duration_ms, system_clock};
pub use error::{
    ConfigError, NetcacheError, NetworkError, Result, StoreError, TransportError,
};
pub use types::{CacheStats, EntryMeta};
