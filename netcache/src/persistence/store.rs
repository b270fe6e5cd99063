use crate::core::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Async key-value string store the caches mirror into
///
/// Implementations may fail on any call. Callers inside this crate degrade
/// such failures to a miss or a no-op; they never surface to cache users.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn remove(&self, key: &str) -> StoreResult<()>;

    async fn list_keys(&self) -> StoreResult<Vec<String>>;
}

/// Shared store handle
pub type SharedStore = Arc<dyn PersistentStore>;

/// Read a key, logging and swallowing store failures
pub(crate) async fn get_or_warn(store: &dyn PersistentStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!("Store GET failed for {}: {}", key, e);
            None
        }
    }
}

/// Write a key, logging store failures. Returns whether the write landed.
pub(crate) async fn set_or_warn(store: &dyn PersistentStore, key: &str, value: &str) -> bool {
    match store.set(key, value).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Store SET failed for {}: {}", key, e);
            false
        }
    }
}

/// Remove a key, logging store failures
pub(crate) async fn remove_or_warn(store: &dyn PersistentStore, key: &str) {
    if let Err(e) = store.remove(key).await {
        warn!("Store REMOVE failed for {}: {}", key, e);
    }
}

/// List keys, treating a failing store as empty
pub(crate) async fn list_or_warn(store: &dyn PersistentStore) -> Vec<String> {
    match store.list_keys().await {
        Ok(keys) => keys,
        Err(e) => {
            warn!("Store LIST failed: {}", e);
            Vec::new()
        }
    }
}

/// In-process store backed by a hash map
///
/// Used as the default adapter and in tests. `set_failing(true)` makes every
/// call return [`StoreError::Unavailable`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, String>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unavailable backend
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Synchronous peek used by tests and diagnostics
    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked failing".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.data.write().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> StoreResult<Vec<String>> {
        self.check()?;
        Ok(self.data.read().keys().cloned().collect())
    }
}
