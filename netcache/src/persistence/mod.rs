/// Persistence adapters
///
/// The caches keep their authoritative index in memory and mirror entries into
/// a swappable [`PersistentStore`]:
/// - `MemoryStore` for tests and ephemeral use
/// - `FileStore` for one-file-per-key durability
pub mod file_store;
pub mod store;

pub use file_store::FileStore;
pub use store::{MemoryStore, PersistentStore, SharedStore, StoreResult};
