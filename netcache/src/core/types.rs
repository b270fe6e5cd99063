use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ownership and tagging metadata attached to a cache entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Owner used by `clear_by_owner` (user id, feature name, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Free-form tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl EntryMeta {
    pub fn owned_by(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Statistics for a cache instance
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    /// Number of live entries
    pub entry_count: usize,
    /// Sum of entry sizes in bytes
    pub total_size_bytes: u64,
    /// Number of lookups that returned a value
    pub hits: u64,
    /// Number of lookups that returned nothing
    pub misses: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Entries stored in compressed form
    pub compressions: u64,
    /// Persisted entries that failed to decode and were dropped
    pub storage_corruptions: u64,
    /// Running mean of lookup latency in microseconds
    pub average_access_latency_us: f64,
    #[serde(skip)]
    latency_samples: u64,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// Fold one lookup duration into the running mean
    pub fn record_access_latency(&mut self, elapsed: Duration) {
        self.latency_samples += 1;
        let sample = elapsed.as_secs_f64() * 1_000_000.0;
        self.average_access_latency_us +=
            (sample - self.average_access_latency_us) / self.latency_samples as f64;
    }

    /// Zero the counters while keeping the size gauges
    pub fn reset_counters(&mut self) {
        *self = Self {
            entry_count: self.entry_count,
            total_size_bytes: self.total_size_bytes,
            ..Self::default()
        };
    }
}
