//! Adaptive Cache
//!
//! Byte-budgeted cache for serialized values:
//! - Size accounting against `max_bytes`
//! - LRU eviction down to 80% of the budget when an insert would overflow it
//! - Opportunistic compression of large values, with the compressed payload
//!   offloaded to the persistent store and only metadata kept in memory
//! - A format-version stamp that hides entries written by older versions
//!
//! The accounted total and the entry map live under one mutex so the budget
//! check and the insert are a single critical section. Operations that write
//! or remove persisted payloads additionally hold an async mirror lock until
//! their store calls finish.

use crate::compression::{CompressionAlgorithm, SharedTransform, compress_if_smaller};
use crate::core::clock::{SharedClock, duration_ms};
use crate::core::error::{ConfigError, NetcacheError};
use crate::core::types::CacheStats;
use crate::metrics;
use crate::persistence::store::{self, SharedStore};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

const METRICS_LABEL: &str = "adaptive";

/// Fixed per-entry bookkeeping charged against the byte budget
pub const ENTRY_OVERHEAD_BYTES: u64 = 64;

/// Fraction of `max_bytes` that LRU eviction shrinks the cache to
const EVICTION_TARGET_RATIO: f64 = 0.8;

/// Runtime profile used to size the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProfile {
    Low,
    Standard,
    High,
}

impl DeviceProfile {
    /// (max_bytes, compression_threshold_bytes) for this profile
    pub fn budget(self) -> (u64, u64) {
        const KIB: u64 = 1024;
        const MIB: u64 = 1024 * KIB;
        match self {
            Self::Low => (10 * MIB, 10 * KIB),
            Self::Standard => (50 * MIB, 50 * KIB),
            Self::High => (100 * MIB, 100 * KIB),
        }
    }
}

/// Adaptive cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptiveCacheConfig {
    /// Byte budget for all live entries
    pub max_bytes: u64,
    /// Default and maximum entry lifetime
    pub max_age_ms: u64,
    /// Values larger than this are compressed when compression is enabled
    pub compression_threshold_bytes: u64,
    pub enable_compression: bool,
    /// When disabled, inserts that would overflow the budget are skipped
    pub enable_lru: bool,
    pub format_version: u32,
    pub algorithm: CompressionAlgorithm,
    /// Prefix for persisted payload keys
    pub namespace: String,
}

impl Default for AdaptiveCacheConfig {
    fn default() -> Self {
        let (max_bytes, compression_threshold_bytes) = DeviceProfile::Standard.budget();
        Self {
            max_bytes,
            max_age_ms: 24 * 60 * 60 * 1000,
            compression_threshold_bytes,
            enable_compression: true,
            enable_lru: true,
            format_version: 1,
            algorithm: CompressionAlgorithm::Lz4,
            namespace: "adaptive".to_string(),
        }
    }
}

impl AdaptiveCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_non_zero("max_bytes", self.max_bytes)?;
        ConfigError::require_non_zero("max_age_ms", self.max_age_ms)?;
        if self.compression_threshold_bytes > self.max_bytes {
            return Err(ConfigError::Exceeds {
                field: "compression_threshold_bytes",
                value: self.compression_threshold_bytes,
                limit_field: "max_bytes",
                limit: self.max_bytes,
            });
        }
        if self.namespace.is_empty() || self.namespace.contains(':') {
            return Err(ConfigError::Invalid {
                field: "namespace",
                reason: "must be non-empty and must not contain ':'".to_string(),
            });
        }
        Ok(())
    }
}

/// Cache entry
///
/// `value` holds the serialized bytes while the entry is uncompressed. For
/// compressed entries it is `None` and the payload lives in the store.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub created_at: u64,
    pub ttl_ms: u64,
    pub size_bytes: u64,
    pub access_count: u64,
    pub last_accessed_at: u64,
    pub compressed: bool,
    pub format_version: u32,
    /// Tie-breaker for entries touched within the same millisecond
    access_seq: u64,
}

impl CacheEntry {
    /// Valid iff younger than its TTL and stamped with the current version
    pub fn is_valid(&self, now: u64, format_version: u32) -> bool {
        now < self.created_at.saturating_add(self.ttl_ms) && self.format_version == format_version
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    stats: CacheStats,
    next_seq: u64,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Evict least recently used entries until the total is at most
    /// `target` and `incoming` more bytes fit under `max_bytes`.
    ///
    /// Returns the keys of evicted compressed entries.
    fn evict_lru(&mut self, target: u64, max_bytes: u64, incoming: u64) -> Vec<String> {
        let mut order: Vec<(u64, u64, String)> = self
            .entries
            .values()
            .map(|e| (e.last_accessed_at, e.access_seq, e.key.clone()))
            .collect();
        order.sort_unstable();

        let mut compressed = Vec::new();
        let mut evicted = 0u64;
        for (_, _, key) in order {
            if self.total_bytes <= target && self.total_bytes + incoming <= max_bytes {
                break;
            }
            if let Some(entry) = self.remove(&key) {
                evicted += 1;
                if entry.compressed {
                    compressed.push(key);
                }
            }
        }

        if evicted > 0 {
            self.stats.evictions += evicted;
            metrics::record_evictions(METRICS_LABEL, evicted);
            debug!(
                "LRU evicted {} entries, total now {} bytes",
                evicted, self.total_bytes
            );
        }
        compressed
    }
}

/// Outcome of a lookup under the state lock
enum Lookup {
    Miss,
    Hit(Vec<u8>),
    /// Compressed entry; payload must be loaded from the store
    Offloaded { created_at: u64 },
    Stale,
}

struct Inner {
    state: Mutex<State>,
    /// Orders payload writes and removals against index changes
    mirror: AsyncMutex<()>,
    config: RwLock<AdaptiveCacheConfig>,
    transform: RwLock<SharedTransform>,
    store: SharedStore,
    clock: SharedClock,
}

/// Byte-budgeted LRU cache with compression offload
#[derive(Clone)]
pub struct AdaptiveCache {
    inner: Arc<Inner>,
}

impl AdaptiveCache {
    /// Create a new adaptive cache
    pub fn new(
        config: AdaptiveCacheConfig,
        store: SharedStore,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Initializing adaptive cache max_bytes={}, threshold={}, compression={:?}/{}, lru={}, version={}",
            config.max_bytes,
            config.compression_threshold_bytes,
            config.algorithm,
            config.enable_compression,
            config.enable_lru,
            config.format_version
        );

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                mirror: AsyncMutex::new(()),
                transform: RwLock::new(config.algorithm.transform()),
                config: RwLock::new(config),
                store,
                clock,
            }),
        })
    }

    /// Replace the compression transform
    pub fn set_transform(&self, transform: SharedTransform) {
        *self.inner.transform.write() = transform;
    }

    pub fn config(&self) -> AdaptiveCacheConfig {
        self.inner.config.read().clone()
    }

    /// Apply a new configuration
    ///
    /// Invalid configurations are rejected before anything changes. A smaller
    /// budget evicts immediately so the bound holds on return.
    pub async fn configure(&self, config: AdaptiveCacheConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let _mirror = self.inner.mirror.lock().await;

        let (algorithm_changed, namespace_changed) = {
            let current = self.inner.config.read();
            (
                current.algorithm != config.algorithm,
                current.namespace != config.namespace,
            )
        };
        if algorithm_changed || namespace_changed {
            // Payloads are only readable with the transform and key prefix
            // that wrote them
            self.drop_compressed().await;
        }
        if algorithm_changed {
            *self.inner.transform.write() = config.algorithm.transform();
        }

        info!(
            "Reconfigured adaptive cache max_bytes={}, version={}",
            config.max_bytes, config.format_version
        );
        let max_bytes = config.max_bytes;
        *self.inner.config.write() = config;

        let evicted = {
            let mut state = self.inner.state.lock();
            if state.total_bytes > max_bytes {
                state.evict_lru(eviction_target(max_bytes), max_bytes, 0)
            } else {
                Vec::new()
            }
        };
        self.remove_payloads(&evicted).await;
        self.publish_size();
        Ok(())
    }

    /// Resize for a runtime profile
    pub async fn configure_for_environment(
        &self,
        profile: DeviceProfile,
    ) -> Result<(), ConfigError> {
        let (max_bytes, compression_threshold_bytes) = profile.budget();
        let config = AdaptiveCacheConfig {
            max_bytes,
            compression_threshold_bytes,
            ..self.config()
        };
        info!("Applying {:?} device profile", profile);
        self.configure(config).await
    }

    /// Destructive full clear on an OS low-memory signal
    pub async fn handle_memory_pressure(&self) {
        warn!("Memory pressure: clearing adaptive cache");
        self.clear().await;
    }

    fn payload_key(&self, key: &str) -> String {
        format!("{}:blob:{}", self.inner.config.read().namespace, key)
    }

    /// Serialize and store a value
    ///
    /// Returns whether the value was cached.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, NetcacheError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.set_bytes(key, bytes, ttl).await)
    }

    /// Store already-serialized bytes
    ///
    /// Returns whether the value was cached. Values whose accounted size
    /// exceeds the whole budget are never cached.
    pub async fn set_bytes(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> bool {
        let _mirror = self.inner.mirror.lock().await;
        let config = self.config();
        let size_bytes = entry_size(key, bytes.len());
        let ttl_ms = ttl.map_or(config.max_age_ms, |d| duration_ms(d).min(config.max_age_ms));

        if size_bytes > config.max_bytes {
            debug!(
                "Not caching {}: {} bytes exceeds budget {}",
                key, size_bytes, config.max_bytes
            );
            self.remove_entry(key).await;
            metrics::record_cache_op(METRICS_LABEL, "set", "skipped");
            return false;
        }

        // Compress outside the state lock; the store round-trip is a suspension point
        let mut compressed = false;
        if config.enable_compression && bytes.len() as u64 > config.compression_threshold_bytes {
            let transform = self.inner.transform.read().clone();
            if let Some(payload) = compress_if_smaller(transform.as_ref(), &bytes) {
                let encoded = BASE64.encode(&payload);
                compressed =
                    store::set_or_warn(self.inner.store.as_ref(), &self.payload_key(key), &encoded)
                        .await;
                if compressed {
                    metrics::record_compression(transform.name());
                }
            }
        }

        let entry = CacheEntry {
            key: key.to_string(),
            value: if compressed { None } else { Some(bytes) },
            created_at: self.inner.clock.now_ms(),
            ttl_ms,
            size_bytes,
            access_count: 0,
            last_accessed_at: self.inner.clock.now_ms(),
            compressed,
            format_version: config.format_version,
            access_seq: 0,
        };
        let (stored, mut stale_payloads) = self.insert_entry(entry, &config);

        stale_payloads.sort_unstable();
        stale_payloads.dedup();
        self.remove_payloads(&stale_payloads).await;
        metrics::record_cache_op(METRICS_LABEL, "set", if stored { "ok" } else { "skipped" });
        self.publish_size();
        debug!(
            "Adaptive SET {} ({} bytes, compressed={}, stored={})",
            key, size_bytes, compressed, stored
        );
        stored
    }

    /// Budget check, eviction and insert as one critical section
    ///
    /// Returns whether the entry was inserted and the payload keys that must
    /// be removed from the store.
    fn insert_entry(
        &self,
        mut entry: CacheEntry,
        config: &AdaptiveCacheConfig,
    ) -> (bool, Vec<String>) {
        let mut state = self.inner.state.lock();
        let mut stale = Vec::new();

        if let Some(old) = state.remove(&entry.key) {
            if old.compressed && !entry.compressed {
                stale.push(old.key);
            }
        }

        if state.total_bytes + entry.size_bytes > config.max_bytes {
            if !config.enable_lru {
                warn!(
                    "Adaptive cache full ({} bytes) and LRU disabled, skipping {}",
                    state.total_bytes, entry.key
                );
                if entry.compressed {
                    stale.push(entry.key);
                }
                return (false, stale);
            }
            stale.extend(state.evict_lru(
                eviction_target(config.max_bytes),
                config.max_bytes,
                entry.size_bytes,
            ));
        }

        entry.access_seq = state.next_seq();
        state.total_bytes += entry.size_bytes;
        if entry.compressed {
            state.stats.compressions += 1;
        }
        state.entries.insert(entry.key.clone(), entry);
        (true, stale)
    }

    /// Get and deserialize a value
    ///
    /// A value that no longer deserializes into `T` is treated as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get_bytes(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Adaptive cache value for {} did not deserialize: {}", key, e);
                None
            }
        }
    }

    /// Get the serialized bytes of a value
    pub async fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        let started = Instant::now();
        let result = self.lookup(key).await;

        {
            let mut state = self.inner.state.lock();
            if result.is_some() {
                state.stats.record_hit();
            } else {
                state.stats.record_miss();
            }
            state.stats.record_access_latency(started.elapsed());
        }
        metrics::record_cache_op(
            METRICS_LABEL,
            "get",
            if result.is_some() { "hit" } else { "miss" },
        );
        result
    }

    async fn lookup(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.inner.clock.now_ms();
        let format_version = self.inner.config.read().format_version;

        let lookup = {
            let mut state = self.inner.state.lock();
            let seq = state.next_seq();
            match state.entries.get_mut(key) {
                None => Lookup::Miss,
                Some(entry) if entry.is_valid(now, format_version) => {
                    entry.access_count += 1;
                    entry.last_accessed_at = now;
                    entry.access_seq = seq;
                    match &entry.value {
                        Some(value) => Lookup::Hit(value.clone()),
                        None => Lookup::Offloaded {
                            created_at: entry.created_at,
                        },
                    }
                }
                Some(_) => Lookup::Stale,
            }
        };

        match lookup {
            Lookup::Miss => None,
            Lookup::Hit(value) => Some(value),
            Lookup::Stale => {
                debug!("Adaptive key expired or stale: {}", key);
                let _mirror = self.inner.mirror.lock().await;
                let removed = {
                    let mut state = self.inner.state.lock();
                    if state
                        .entries
                        .get(key)
                        .is_some_and(|e| !e.is_valid(now, format_version))
                    {
                        state.remove(key)
                    } else {
                        None
                    }
                };
                if removed.is_some_and(|e| e.compressed) {
                    self.remove_payloads(&[key.to_string()]).await;
                }
                self.publish_size();
                None
            }
            Lookup::Offloaded { created_at } => self.load_payload(key, created_at).await,
        }
    }

    /// Fetch and decode a compressed payload from the store
    async fn load_payload(&self, key: &str, created_at: u64) -> Option<Vec<u8>> {
        let payload_key = self.payload_key(key);
        let transform = self.inner.transform.read().clone();

        let decoded = match store::get_or_warn(self.inner.store.as_ref(), &payload_key).await {
            Some(encoded) => BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| e.to_string())
                .and_then(|payload| transform.decompress(&payload).map_err(|e| e.to_string())),
            None => Err("payload missing from store".to_string()),
        };

        match decoded {
            Ok(value) => Some(value),
            Err(reason) => {
                warn!("Dropping corrupt compressed entry {}: {}", key, reason);
                let _mirror = self.inner.mirror.lock().await;
                let drop_payload = {
                    let mut state = self.inner.state.lock();
                    state.stats.storage_corruptions += 1;
                    // Only drop the entry this lookup saw, not a newer write
                    match state.entries.get(key) {
                        Some(e) if e.created_at == created_at && e.compressed => {
                            state.remove(key);
                            true
                        }
                        Some(e) => !e.compressed,
                        None => true,
                    }
                };
                metrics::record_corruption(METRICS_LABEL);
                if drop_payload {
                    store::remove_or_warn(self.inner.store.as_ref(), &payload_key).await;
                }
                self.publish_size();
                None
            }
        }
    }

    /// Check whether a valid entry exists without touching access metadata
    pub fn has(&self, key: &str) -> bool {
        let now = self.inner.clock.now_ms();
        let format_version = self.inner.config.read().format_version;
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| e.is_valid(now, format_version))
    }

    /// Metadata snapshot of an entry, valid or not
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.inner.state.lock().entries.get(key).cloned()
    }

    /// Delete a key
    pub async fn delete(&self, key: &str) -> bool {
        let _mirror = self.inner.mirror.lock().await;
        self.remove_entry(key).await
    }

    /// Remove an entry and its payload; the caller holds the mirror lock
    async fn remove_entry(&self, key: &str) -> bool {
        let removed = self.inner.state.lock().remove(key);
        match removed {
            Some(entry) => {
                if entry.compressed {
                    self.remove_payloads(&[entry.key]).await;
                }
                self.publish_size();
                true
            }
            None => false,
        }
    }

    /// Remove every entry and persisted payload, and reset statistics
    pub async fn clear(&self) {
        let _mirror = self.inner.mirror.lock().await;
        let count = {
            let mut state = self.inner.state.lock();
            let count = state.entries.len();
            state.entries.clear();
            state.total_bytes = 0;
            state.stats = CacheStats::default();
            count
        };

        // Sweep by prefix so payloads orphaned by failed removals go too
        let prefix = self.payload_key("");
        let store = self.inner.store.as_ref();
        for key in store::list_or_warn(store).await {
            if key.starts_with(&prefix) {
                store::remove_or_warn(store, &key).await;
            }
        }

        self.publish_size();
        info!("Adaptive cache cleared ({} entries)", count);
    }

    /// Remove persisted payloads that no compressed entry refers to
    ///
    /// The index is memory-only, so payloads written by an earlier process
    /// are unreachable. Run once after construction on a durable store.
    pub async fn reconcile_store(&self) -> usize {
        let _mirror = self.inner.mirror.lock().await;
        let prefix = self.payload_key("");
        let store = self.inner.store.as_ref();

        let mut removed = 0;
        for store_key in store::list_or_warn(store).await {
            let Some(key) = store_key.strip_prefix(&prefix) else {
                continue;
            };
            let referenced = self
                .inner
                .state
                .lock()
                .entries
                .get(key)
                .is_some_and(|e| e.compressed);
            if !referenced {
                store::remove_or_warn(store, &store_key).await;
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Removed {} orphaned adaptive payloads", removed);
        }
        removed
    }

    /// Drop all compressed entries; the caller holds the mirror lock
    async fn drop_compressed(&self) {
        let keys: Vec<String> = {
            let mut state = self.inner.state.lock();
            let keys: Vec<String> = state
                .entries
                .values()
                .filter(|e| e.compressed)
                .map(|e| e.key.clone())
                .collect();
            for key in &keys {
                state.remove(key);
            }
            keys
        };
        self.remove_payloads(&keys).await;
    }

    async fn remove_payloads(&self, keys: &[String]) {
        for key in keys {
            store::remove_or_warn(self.inner.store.as_ref(), &self.payload_key(key)).await;
        }
    }

    fn publish_size(&self) {
        let total = self.inner.state.lock().total_bytes;
        metrics::update_cache_size(METRICS_LABEL, total);
    }

    /// Get statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        let mut stats = state.stats.clone();
        stats.entry_count = state.entries.len();
        stats.total_size_bytes = state.total_bytes;
        stats
    }

    pub fn reset_stats(&self) {
        self.inner.state.lock().stats.reset_counters();
    }
}

/// Accounted size of an entry: key, serialized value and fixed overhead
pub fn entry_size(key: &str, value_len: usize) -> u64 {
    key.len() as u64 + value_len as u64 + ENTRY_OVERHEAD_BYTES
}

fn eviction_target(max_bytes: u64) -> u64 {
    (max_bytes as f64 * EVICTION_TARGET_RATIO) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionTransform;
    use crate::core::clock::ManualClock;
    use crate::persistence::{MemoryStore, PersistentStore, StoreResult};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    fn cache_with(config: AdaptiveCacheConfig) -> (AdaptiveCache, MemoryStore, ManualClock) {
        let store = MemoryStore::new();
        let clock = ManualClock::new(10_000);
        let cache =
            AdaptiveCache::new(config, Arc::new(store.clone()), Arc::new(clock.clone())).unwrap();
        (cache, store, clock)
    }

    fn small_config(max_bytes: u64) -> AdaptiveCacheConfig {
        AdaptiveCacheConfig {
            max_bytes,
            compression_threshold_bytes: max_bytes,
            enable_compression: false,
            ..Default::default()
        }
    }

    /// Payload whose accounted size is exactly `size` for a two-char key
    fn payload_of(size: u64) -> Vec<u8> {
        vec![b'x'; (size - 2 - ENTRY_OVERHEAD_BYTES) as usize]
    }

    #[tokio::test]
    async fn test_set_get_typed() {
        let (cache, _, _) = cache_with(AdaptiveCacheConfig::default());

        assert!(cache.set("user", &json!({"name": "ana"}), None).await.unwrap());
        let value: Option<Value> = cache.get("user").await;
        assert_eq!(value, Some(json!({"name": "ana"})));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(
            stats.total_size_bytes,
            entry_size("user", br#"{"name":"ana"}"#.len())
        );
    }

    #[tokio::test]
    async fn test_lru_evicts_to_eighty_percent() {
        let (cache, _, clock) = cache_with(small_config(1000));

        for key in ["k0", "k1", "k2"] {
            assert!(cache.set_bytes(key, payload_of(300), None).await);
            clock.advance(1);
        }
        assert_eq!(cache.stats().total_size_bytes, 900);

        // Touch k0 so k1 becomes the least recently used
        assert!(cache.get_bytes("k0").await.is_some());
        clock.advance(1);

        assert!(cache.set_bytes("k3", payload_of(300), None).await);

        assert!(!cache.has("k1"), "least recently used entry evicted");
        assert!(cache.has("k0"), "recently read entry retained");
        let stats = cache.stats();
        assert!(stats.total_size_bytes <= 1000);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_oversized_value_not_cached() {
        let (cache, _, _) = cache_with(small_config(100));
        assert!(!cache.set_bytes("big", vec![0; 200], None).await);
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[tokio::test]
    async fn test_lru_disabled_skips_insert() {
        let (cache, _, _) = cache_with(AdaptiveCacheConfig {
            enable_lru: false,
            ..small_config(1000)
        });

        assert!(cache.set_bytes("k0", payload_of(600), None).await);
        assert!(!cache.set_bytes("k1", payload_of(600), None).await);
        assert!(cache.has("k0"));
        assert_eq!(cache.stats().total_size_bytes, 600);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_accounting() {
        let (cache, _, _) = cache_with(small_config(1000));
        cache.set_bytes("k0", payload_of(300), None).await;
        cache.set_bytes("k0", payload_of(200), None).await;
        assert_eq!(cache.stats().total_size_bytes, 200);
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[tokio::test]
    async fn test_compression_offloads_payload() {
        let (cache, store, _) = cache_with(AdaptiveCacheConfig {
            compression_threshold_bytes: 100,
            ..Default::default()
        });
        let text = "habit streak ".repeat(100);

        cache.set("big", &text, None).await.unwrap();

        let entry = cache.entry("big").unwrap();
        assert!(entry.compressed);
        assert!(entry.value.is_none());
        assert!(store.contains("adaptive:blob:big"));
        assert_eq!(cache.stats().compressions, 1);

        let roundtrip: Option<String> = cache.get("big").await;
        assert_eq!(roundtrip, Some(text));

        assert!(cache.delete("big").await);
        assert!(!store.contains("adaptive:blob:big"));
    }

    #[tokio::test]
    async fn test_small_values_stay_in_memory() {
        let (cache, store, _) = cache_with(AdaptiveCacheConfig {
            compression_threshold_bytes: 1024,
            ..Default::default()
        });

        cache.set("small", &"tiny", None).await.unwrap();
        let entry = cache.entry("small").unwrap();
        assert!(!entry.compressed);
        assert!(entry.value.is_some());
        assert!(store.is_empty());
    }

    struct Inflate;

    impl CompressionTransform for Inflate {
        fn name(&self) -> &'static str {
            "inflate"
        }

        fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
            let mut out = data.to_vec();
            out.extend_from_slice(data);
            Ok(out)
        }

        fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
            Ok(data[..data.len() / 2].to_vec())
        }
    }

    #[tokio::test]
    async fn test_transform_applied_only_when_smaller() {
        let (cache, store, _) = cache_with(AdaptiveCacheConfig {
            compression_threshold_bytes: 10,
            ..Default::default()
        });
        cache.set_transform(Arc::new(Inflate));

        cache.set("k", &"x".repeat(500), None).await.unwrap();
        assert!(!cache.entry("k").unwrap().compressed);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_value_in_memory() {
        let (cache, store, _) = cache_with(AdaptiveCacheConfig {
            compression_threshold_bytes: 100,
            ..Default::default()
        });
        store.set_failing(true);

        let text = "abc".repeat(200);
        cache.set("k", &text, None).await.unwrap();
        assert!(!cache.entry("k").unwrap().compressed);
        assert_eq!(cache.get::<String>("k").await, Some(text));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_dropped() {
        let (cache, store, _) = cache_with(AdaptiveCacheConfig {
            compression_threshold_bytes: 100,
            ..Default::default()
        });
        cache.set("k", &"z".repeat(1000), None).await.unwrap();
        store.set("adaptive:blob:k", "!!not base64!!").await.unwrap();

        assert_eq!(cache.get::<String>("k").await, None);
        let stats = cache.stats();
        assert_eq!(stats.storage_corruptions, 1);
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.total_size_bytes, 0);
        assert!(!store.contains("adaptive:blob:k"));
    }

    #[tokio::test]
    async fn test_expiry_and_max_age_cap() {
        let (cache, _, clock) = cache_with(AdaptiveCacheConfig {
            max_age_ms: 1000,
            ..Default::default()
        });

        cache
            .set("k", &1, Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(cache.entry("k").unwrap().ttl_ms, 1000);

        clock.advance(1000);
        assert_eq!(cache.get::<i32>("k").await, None);
        assert_eq!(cache.stats().total_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_huge_ttl_capped_not_wrapped() {
        let (cache, _, _) = cache_with(AdaptiveCacheConfig {
            max_age_ms: 5_000,
            ..Default::default()
        });

        cache.set("k", &1, Some(Duration::MAX)).await.unwrap();
        assert_eq!(cache.entry("k").unwrap().ttl_ms, 5_000);
    }

    #[tokio::test]
    async fn test_reconcile_removes_payloads_from_previous_process() {
        let store = MemoryStore::new();
        let config = AdaptiveCacheConfig {
            compression_threshold_bytes: 100,
            ..Default::default()
        };
        {
            let previous = AdaptiveCache::new(
                config.clone(),
                Arc::new(store.clone()),
                Arc::new(ManualClock::new(0)),
            )
            .unwrap();
            previous.set("big", &"x".repeat(3000), None).await.unwrap();
        }
        assert!(store.contains("adaptive:blob:big"));

        let cache = AdaptiveCache::new(
            config,
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        cache.set("live", &"y".repeat(3000), None).await.unwrap();
        store.set("other:key", "x").await.unwrap();

        assert_eq!(cache.reconcile_store().await, 1);
        assert!(!store.contains("adaptive:blob:big"));
        assert!(store.contains("adaptive:blob:live"));
        assert!(store.contains("other:key"));
        assert_eq!(
            cache.get::<String>("live").await,
            Some("y".repeat(3000))
        );
    }

    /// Store with slow writes and slower removals
    struct SlowStore(MemoryStore);

    #[async_trait]
    impl PersistentStore for SlowStore {
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.0.set(key, value).await
        }

        async fn remove(&self, key: &str) -> StoreResult<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.0.remove(key).await
        }

        async fn list_keys(&self) -> StoreResult<Vec<String>> {
            self.0.list_keys().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_during_delete_keeps_new_payload() {
        let store = MemoryStore::new();
        let cache = AdaptiveCache::new(
            AdaptiveCacheConfig {
                compression_threshold_bytes: 100,
                ..Default::default()
            },
            Arc::new(SlowStore(store.clone())),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        cache.set("k", &"a".repeat(1000), None).await.unwrap();

        let deleter = cache.clone();
        let pending = tokio::spawn(async move { deleter.delete("k").await });
        // Let the delete reach the slow removal
        tokio::time::sleep(Duration::from_millis(1)).await;

        cache.set("k", &"b".repeat(1000), None).await.unwrap();
        assert!(pending.await.unwrap());

        assert!(store.contains("adaptive:blob:k"));
        assert_eq!(cache.get::<String>("k").await, Some("b".repeat(1000)));
        assert_eq!(cache.stats().storage_corruptions, 0);
    }

    #[tokio::test]
    async fn test_format_version_bump_invalidates() {
        let (cache, _, _) = cache_with(AdaptiveCacheConfig::default());
        cache.set("k", &"v1", None).await.unwrap();

        cache
            .configure(AdaptiveCacheConfig {
                format_version: 2,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(!cache.has("k"));
        assert_eq!(cache.get::<String>("k").await, None);

        cache.set("k", &"v2", None).await.unwrap();
        assert_eq!(cache.get::<String>("k").await, Some("v2".to_string()));
    }

    #[tokio::test]
    async fn test_configure_rejects_invalid() {
        let (cache, _, _) = cache_with(AdaptiveCacheConfig::default());
        let before = cache.config();

        let result = cache
            .configure(AdaptiveCacheConfig {
                max_bytes: 0,
                ..Default::default()
            })
            .await;
        assert_eq!(result, Err(ConfigError::Zero { field: "max_bytes" }));

        let result = cache
            .configure(AdaptiveCacheConfig {
                max_bytes: 100,
                compression_threshold_bytes: 200,
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(ConfigError::Exceeds { .. })));
        assert_eq!(cache.config(), before);
    }

    #[tokio::test]
    async fn test_shrinking_budget_evicts() {
        let (cache, _, clock) = cache_with(small_config(1000));
        for key in ["k0", "k1", "k2"] {
            cache.set_bytes(key, payload_of(300), None).await;
            clock.advance(1);
        }

        cache.configure(small_config(500)).await.unwrap();
        assert!(cache.stats().total_size_bytes <= 400);
        assert!(cache.has("k2"));
    }

    #[tokio::test]
    async fn test_environment_profile() {
        let (cache, _, _) = cache_with(AdaptiveCacheConfig::default());
        cache
            .configure_for_environment(DeviceProfile::Low)
            .await
            .unwrap();

        let config = cache.config();
        assert_eq!(config.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.compression_threshold_bytes, 10 * 1024);
    }

    #[tokio::test]
    async fn test_memory_pressure_clears_everything() {
        let (cache, store, _) = cache_with(AdaptiveCacheConfig {
            compression_threshold_bytes: 100,
            ..Default::default()
        });
        cache.set("big", &"q".repeat(2000), None).await.unwrap();
        cache.set("small", &1, None).await.unwrap();

        cache.handle_memory_pressure().await;

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.total_size_bytes, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_profile_budgets_are_valid() {
        for profile in [DeviceProfile::Low, DeviceProfile::Standard, DeviceProfile::High] {
            let (max_bytes, threshold) = profile.budget();
            let config = AdaptiveCacheConfig {
                max_bytes,
                compression_threshold_bytes: threshold,
                ..Default::default()
            };
            assert!(config.validate().is_ok());
        }
    }
}
