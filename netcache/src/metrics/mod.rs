//! Prometheus Metrics for netcache
//!
//! Metrics collection for all components:
//! - TTL and adaptive cache operations
//! - Evictions, compressions and storage corruptions
//! - Scheduled network requests, retries and admission state

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec,
};

lazy_static! {
    // ============================================================================
    // Cache Metrics
    // ============================================================================

    /// Cache operations by cache, operation and result
    pub static ref CACHE_OPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "netcache_cache_operations_total",
        "Total number of cache operations by cache, operation and result",
        &["cache", "operation", "result"]
    ).unwrap();

    /// Entries evicted to make room
    pub static ref CACHE_EVICTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "netcache_cache_evictions_total",
        "Total number of cache evictions",
        &["cache"]
    ).unwrap();

    /// Entries stored compressed
    pub static ref CACHE_COMPRESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "netcache_cache_compressions_total",
        "Total number of compressed cache writes",
        &["algorithm"]
    ).unwrap();

    /// Persisted entries dropped because they failed to decode
    pub static ref CACHE_CORRUPTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "netcache_cache_storage_corruptions_total",
        "Total number of corrupt persisted cache entries",
        &["cache"]
    ).unwrap();

    /// Current cache size in bytes
    pub static ref CACHE_SIZE_BYTES: IntGaugeVec = register_int_gauge_vec!(
        "netcache_cache_size_bytes",
        "Current accounted cache size in bytes",
        &["cache"]
    ).unwrap();

    // ============================================================================
    // Network Metrics
    // ============================================================================

    /// Scheduled requests by outcome (success, failure, cache_hit)
    pub static ref NETWORK_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "netcache_network_requests_total",
        "Total number of scheduled network requests by outcome",
        &["outcome"]
    ).unwrap();

    /// Retries by failure reason (timeout, transport, status)
    pub static ref NETWORK_RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "netcache_network_retries_total",
        "Total number of request retries by reason",
        &["reason"]
    ).unwrap();

    /// End-to-end request latency including queueing and retries
    pub static ref NETWORK_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "netcache_network_request_duration_seconds",
        "Scheduled request latency in seconds",
        &["priority"],
        vec![0.005, 0.05, 0.25, 1.0, 5.0, 30.0]
    ).unwrap();

    /// Admission state (in_flight, queued)
    pub static ref NETWORK_ADMISSION: IntGaugeVec = register_int_gauge_vec!(
        "netcache_network_admission",
        "Requests currently in flight or waiting for a connection",
        &["state"]
    ).unwrap();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record cache operation
pub fn record_cache_op(cache: &str, operation: &str, result: &str) {
    CACHE_OPS_TOTAL
        .with_label_values(&[cache, operation, result])
        .inc();
}

/// Record evictions
pub fn record_evictions(cache: &str, count: u64) {
    CACHE_EVICTIONS_TOTAL.with_label_values(&[cache]).inc_by(count);
}

/// Record a compressed write
pub fn record_compression(algorithm: &str) {
    CACHE_COMPRESSIONS_TOTAL
        .with_label_values(&[algorithm])
        .inc();
}

/// Record a dropped corrupt entry
pub fn record_corruption(cache: &str) {
    CACHE_CORRUPTIONS_TOTAL.with_label_values(&[cache]).inc();
}

/// Update cache size gauge
pub fn update_cache_size(cache: &str, bytes: u64) {
    CACHE_SIZE_BYTES
        .with_label_values(&[cache])
        .set(i64::try_from(bytes).unwrap_or(i64::MAX));
}

/// Record a finished request
pub fn record_request(outcome: &str, priority: &str, duration_secs: f64) {
    NETWORK_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    NETWORK_REQUEST_DURATION
        .with_label_values(&[priority])
        .observe(duration_secs);
}

/// Record a retry
pub fn record_retry(reason: &str) {
    NETWORK_RETRIES_TOTAL.with_label_values(&[reason]).inc();
}

/// Update admission gauges
pub fn update_admission(in_flight: usize, queued: usize) {
    NETWORK_ADMISSION
        .with_label_values(&["in_flight"])
        .set(in_flight as i64);
    NETWORK_ADMISSION
        .with_label_values(&["queued"])
        .set(queued as i64);
}
