//! TTL Cache
//!
//! Generic expiring key-value cache mirrored into a [`PersistentStore`].
//! The in-memory map is authoritative; the store holds a JSON copy of each
//! entry under `"{namespace}:{key}"` so entries survive restarts via
//! [`TtlCache::rehydrate`].
//!
//! Expiry is lazy: an entry is readable while `now < created_at + ttl` and its
//! format version matches. The background sweeper only reclaims memory.

use crate::core::clock::{SharedClock, duration_ms};
use crate::core::error::ConfigError;
use crate::core::types::{CacheStats, EntryMeta};
use crate::metrics;
use crate::persistence::store::{self, SharedStore};
use parking_lot::RwLock;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

const METRICS_LABEL: &str = "ttl";

/// Configuration for a TTL cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtlCacheConfig {
    /// Prefix for persisted keys
    pub namespace: String,
    /// TTL applied when `set` is called without one
    pub default_ttl_ms: u64,
    /// Maximum number of live entries before batch eviction
    pub max_entries: usize,
    /// Background sweep interval in milliseconds
    pub sweep_interval_ms: u64,
    /// Stamp written into every entry; a mismatch hides the entry
    pub format_version: u32,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            namespace: "ttl".to_string(),
            default_ttl_ms: 5 * 60 * 1000,
            max_entries: 1000,
            sweep_interval_ms: 60 * 1000,
            format_version: 1,
        }
    }
}

impl TtlCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() || self.namespace.contains(':') {
            return Err(ConfigError::Invalid {
                field: "namespace",
                reason: "must be non-empty and must not contain ':'".to_string(),
            });
        }
        ConfigError::require_non_zero("default_ttl_ms", self.default_ttl_ms)?;
        ConfigError::require_non_zero("max_entries", self.max_entries as u64)?;
        ConfigError::require_non_zero("sweep_interval_ms", self.sweep_interval_ms)?;
        Ok(())
    }
}

/// Persisted form of an entry
#[derive(Serialize, Deserialize)]
struct TtlRecord<T> {
    value: T,
    created_at: u64,
    ttl_ms: u64,
    format_version: u32,
    #[serde(default)]
    meta: EntryMeta,
}

/// In-memory entry
#[derive(Debug, Clone)]
struct TtlEntry<V> {
    value: V,
    created_at: u64,
    ttl_ms: u64,
    format_version: u32,
    meta: EntryMeta,
    size_bytes: u64,
    access_count: u64,
    last_accessed_at: u64,
}

impl<V> TtlEntry<V> {
    fn is_valid(&self, now: u64, format_version: u32) -> bool {
        is_fresh(self.created_at, self.ttl_ms, now) && self.format_version == format_version
    }
}

fn is_fresh(created_at: u64, ttl_ms: u64, now: u64) -> bool {
    now < created_at.saturating_add(ttl_ms)
}

struct Inner<V> {
    entries: RwLock<HashMap<String, TtlEntry<V>>>,
    stats: RwLock<CacheStats>,
    config: RwLock<TtlCacheConfig>,
    /// Held from a mirrored memory change until its store write completes,
    /// so store writes land in the same order as the memory changes
    mirror: AsyncMutex<()>,
    store: SharedStore,
    clock: SharedClock,
}

/// Expiring key-value cache with persistence mirroring
pub struct TtlCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a new TTL cache
    pub fn new(
        config: TtlCacheConfig,
        store: SharedStore,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Initializing TTL cache namespace={}, max_entries={}, default_ttl={}ms",
            config.namespace, config.max_entries, config.default_ttl_ms
        );

        Ok(Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                stats: RwLock::new(CacheStats::default()),
                config: RwLock::new(config),
                mirror: AsyncMutex::new(()),
                store,
                clock,
            }),
        })
    }

    /// Replace the configuration; takes effect on the next operation
    pub fn configure(&self, config: TtlCacheConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.inner.config.write() = config;
        Ok(())
    }

    pub fn config(&self) -> TtlCacheConfig {
        self.inner.config.read().clone()
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.inner.config.read().namespace, key)
    }

    /// Store a value
    ///
    /// `ttl` defaults to `default_ttl_ms`. Inserting a new key into a full
    /// cache first evicts the oldest ~10% of entries by creation time.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>, meta: Option<EntryMeta>) {
        let (ttl_ms, format_version, max_entries) = {
            let config = self.inner.config.read();
            let ttl_ms = ttl.map_or(config.default_ttl_ms, duration_ms);
            (ttl_ms, config.format_version, config.max_entries)
        };
        let now = self.inner.clock.now_ms();
        let meta = meta.unwrap_or_default();

        let record = TtlRecord {
            value: &value,
            created_at: now,
            ttl_ms,
            format_version,
            meta: meta.clone(),
        };
        let serialized = match serde_json::to_string(&record) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("TTL cache could not serialize {}: {}", key, e);
                None
            }
        };

        debug!("TTL SET key={}, ttl={}ms", key, ttl_ms);

        let _mirror = self.inner.mirror.lock().await;
        let evicted = {
            let mut entries = self.inner.entries.write();
            let evicted = if !entries.contains_key(key) && entries.len() >= max_entries {
                Self::evict_oldest_batch(&mut entries)
            } else {
                Vec::new()
            };

            entries.insert(
                key.to_string(),
                TtlEntry {
                    value,
                    created_at: now,
                    ttl_ms,
                    format_version,
                    meta,
                    size_bytes: serialized.as_ref().map_or(0, |s| s.len() as u64),
                    access_count: 0,
                    last_accessed_at: now,
                },
            );
            evicted
        };

        if !evicted.is_empty() {
            let mut stats = self.inner.stats.write();
            stats.evictions += evicted.len() as u64;
            metrics::record_evictions(METRICS_LABEL, evicted.len() as u64);
        }
        metrics::record_cache_op(METRICS_LABEL, "set", "ok");

        for evicted_key in evicted {
            store::remove_or_warn(self.inner.store.as_ref(), &self.store_key(&evicted_key)).await;
        }
        if let Some(serialized) = serialized {
            store::set_or_warn(self.inner.store.as_ref(), &self.store_key(key), &serialized)
                .await;
        }
    }

    /// Get a value if present and valid
    pub fn get(&self, key: &str) -> Option<V> {
        let started = Instant::now();
        let now = self.inner.clock.now_ms();
        let format_version = self.inner.config.read().format_version;

        let result = {
            let mut entries = self.inner.entries.write();
            match entries.get_mut(key) {
                Some(entry) if entry.is_valid(now, format_version) => {
                    entry.access_count += 1;
                    entry.last_accessed_at = now;
                    Some(entry.value.clone())
                }
                Some(_) => {
                    debug!("TTL key expired or stale: {}", key);
                    entries.remove(key);
                    None
                }
                None => None,
            }
        };

        let mut stats = self.inner.stats.write();
        if result.is_some() {
            stats.record_hit();
            metrics::record_cache_op(METRICS_LABEL, "get", "hit");
        } else {
            stats.record_miss();
            metrics::record_cache_op(METRICS_LABEL, "get", "miss");
        }
        stats.record_access_latency(started.elapsed());

        result
    }

    /// Check whether a valid entry exists without touching access metadata
    pub fn has(&self, key: &str) -> bool {
        let now = self.inner.clock.now_ms();
        let format_version = self.inner.config.read().format_version;
        self.inner
            .entries
            .read()
            .get(key)
            .is_some_and(|entry| entry.is_valid(now, format_version))
    }

    /// Delete a key from memory and from the store
    pub async fn delete(&self, key: &str) -> bool {
        debug!("TTL DELETE key={}", key);
        let _mirror = self.inner.mirror.lock().await;
        let removed = self.inner.entries.write().remove(key).is_some();
        store::remove_or_warn(self.inner.store.as_ref(), &self.store_key(key)).await;
        removed
    }

    /// Return the cached value or compute, store and return it
    ///
    /// The fallback runs at most once per call and only on a miss. An error
    /// from the fallback is returned as-is and nothing is written.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        fallback: F,
        ttl: Option<Duration>,
        meta: Option<EntryMeta>,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = fallback().await?;
        self.set(key, value.clone(), ttl, meta).await;
        Ok(value)
    }

    /// Remove every entry whose key matches `pattern`
    pub async fn clear_by_pattern(&self, pattern: &Regex) -> usize {
        let removed = self.remove_where(|key, _| pattern.is_match(key)).await;
        debug!("TTL cleared {} keys matching {}", removed, pattern);
        removed
    }

    /// Remove every entry owned by `owner`
    pub async fn clear_by_owner(&self, owner: &str) -> usize {
        let removed = self
            .remove_where(|_, entry| entry.meta.owner.as_deref() == Some(owner))
            .await;
        debug!("TTL cleared {} keys owned by {}", removed, owner);
        removed
    }

    /// Remove every entry and reset statistics
    pub async fn clear(&self) {
        self.remove_where(|_, _| true).await;
        *self.inner.stats.write() = CacheStats::default();
    }

    async fn remove_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&str, &TtlEntry<V>) -> bool,
    {
        let _mirror = self.inner.mirror.lock().await;
        let keys: Vec<String> = {
            let mut entries = self.inner.entries.write();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(k, e)| predicate(k, e))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };

        for key in &keys {
            store::remove_or_warn(self.inner.store.as_ref(), &self.store_key(key)).await;
        }
        keys.len()
    }

    /// Get statistics
    pub fn stats(&self) -> CacheStats {
        let entries = self.inner.entries.read();
        let mut stats = self.inner.stats.read().clone();
        stats.entry_count = entries.len();
        stats.total_size_bytes = entries.values().map(|e| e.size_bytes).sum();
        stats
    }

    pub fn reset_stats(&self) {
        self.inner.stats.write().reset_counters();
    }

    /// Number of accesses recorded for a live entry
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.inner.entries.read().get(key).map(|e| e.access_count)
    }

    /// Load persisted entries into memory
    ///
    /// Invalid entries are dropped and their persisted copies removed.
    /// Entries that fail to parse are counted as storage corruptions.
    pub async fn rehydrate(&self) -> usize {
        let _mirror = self.inner.mirror.lock().await;
        let (prefix, format_version, max_entries) = {
            let config = self.inner.config.read();
            (
                format!("{}:", config.namespace),
                config.format_version,
                config.max_entries,
            )
        };
        let store = self.inner.store.as_ref();
        let now = self.inner.clock.now_ms();

        let mut loaded = 0;
        let mut dropped = Vec::new();
        for store_key in store::list_or_warn(store).await {
            let Some(key) = store_key.strip_prefix(&prefix) else {
                continue;
            };
            let Some(raw) = store::get_or_warn(store, &store_key).await else {
                continue;
            };

            let record: TtlRecord<V> = match serde_json::from_str(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Dropping corrupt persisted entry {}: {}", store_key, e);
                    self.inner.stats.write().storage_corruptions += 1;
                    metrics::record_corruption(METRICS_LABEL);
                    dropped.push(store_key.clone());
                    continue;
                }
            };

            if record.format_version != format_version
                || !is_fresh(record.created_at, record.ttl_ms, now)
            {
                dropped.push(store_key.clone());
                continue;
            }

            let mut entries = self.inner.entries.write();
            if !entries.contains_key(key) {
                entries.insert(
                    key.to_string(),
                    TtlEntry {
                        value: record.value,
                        created_at: record.created_at,
                        ttl_ms: record.ttl_ms,
                        format_version: record.format_version,
                        meta: record.meta,
                        size_bytes: raw.len() as u64,
                        access_count: 0,
                        last_accessed_at: now,
                    },
                );
                loaded += 1;
            }
        }

        let mut evicted = Vec::new();
        {
            let mut entries = self.inner.entries.write();
            while entries.len() > max_entries {
                evicted.extend(Self::evict_oldest_batch(&mut entries));
            }
        }
        if !evicted.is_empty() {
            self.inner.stats.write().evictions += evicted.len() as u64;
            metrics::record_evictions(METRICS_LABEL, evicted.len() as u64);
        }

        for key in &dropped {
            store::remove_or_warn(store, key).await;
        }
        for key in &evicted {
            store::remove_or_warn(store, &format!("{}{}", prefix, key)).await;
        }

        info!(
            "Rehydrated {} TTL entries ({} dropped, {} evicted)",
            loaded,
            dropped.len(),
            evicted.len()
        );
        loaded
    }

    /// Remove expired and stale entries from memory and the store
    pub async fn sweep_expired(&self) -> usize {
        let now = self.inner.clock.now_ms();
        let format_version = self.inner.config.read().format_version;
        let removed = self
            .remove_where(|_, entry| !entry.is_valid(now, format_version))
            .await;
        if removed > 0 {
            debug!("Swept {} expired TTL entries", removed);
        }
        removed
    }

    /// Start background sweep task
    ///
    /// `sweep_interval_ms` is re-read before every wait. The task holds only a
    /// weak reference and stops once the cache is dropped.
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        info!(
            "Starting TTL sweep task (interval={}ms)",
            self.inner.config.read().sweep_interval_ms
        );

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let interval_ms = match weak.upgrade() {
                    Some(inner) => inner.config.read().sweep_interval_ms,
                    None => break,
                };
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                TtlCache { inner }.sweep_expired().await;
            }
            debug!("TTL sweep task stopped");
        })
    }

    /// Evict the oldest ~10% of entries by creation time (at least one)
    fn evict_oldest_batch(entries: &mut HashMap<String, TtlEntry<V>>) -> Vec<String> {
        let count = entries.len().div_ceil(10).max(1);

        let mut by_age: Vec<(u64, String)> = entries
            .iter()
            .map(|(k, e)| (e.created_at, k.clone()))
            .collect();
        by_age.sort_unstable();

        let victims: Vec<String> = by_age.into_iter().take(count).map(|(_, k)| k).collect();
        for key in &victims {
            entries.remove(key);
        }
        debug!("TTL batch eviction removed {} entries", victims.len());
        victims
    }
}
