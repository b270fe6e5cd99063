//! Cache Benchmarks
//!
//! Measures the hot paths of both caches and the compression transforms on
//! typical API response payloads.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use netcache::cache::{AdaptiveCache, AdaptiveCacheConfig, TtlCache, TtlCacheConfig};
use netcache::compression::CompressionAlgorithm;
use netcache::core::system_clock;
use netcache::persistence::MemoryStore;
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// JSON-like payload of roughly `size` bytes
fn generate_payload(size: usize) -> Vec<u8> {
    let json = serde_json::json!({
        "id": "user-12345",
        "name": "Andre Silva",
        "email": "andre@example.com",
        "tags": ["developer", "rust", "tokio"],
        "metadata": {"created_at": "2025-10-22T00:00:00Z"}
    });
    let json_str = serde_json::to_string(&json).unwrap();
    json_str.as_bytes().repeat(size / json_str.len() + 1)[..size].to_vec()
}

fn adaptive_cache(max_bytes: u64, enable_compression: bool) -> AdaptiveCache {
    AdaptiveCache::new(
        AdaptiveCacheConfig {
            max_bytes,
            compression_threshold_bytes: 4 * 1024,
            enable_compression,
            ..Default::default()
        },
        Arc::new(MemoryStore::new()),
        system_clock(),
    )
    .unwrap()
}

/// Benchmark adaptive cache set/get for uncompressed values
fn bench_adaptive_hot_path(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("adaptive_cache");

    for size in [256usize, 2 * 1024] {
        let payload = generate_payload(size);
        let cache = adaptive_cache(64 * 1024 * 1024, false);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("set_bytes", size), &payload, |b, data| {
            let mut i = 0u64;
            b.to_async(&rt).iter(|| {
                i += 1;
                let key = format!("key:{}", i % 1000);
                let cache = cache.clone();
                let data = data.clone();
                async move { cache.set_bytes(&key, black_box(data), None).await }
            })
        });

        rt.block_on(cache.set_bytes("hot", payload.clone(), None));
        group.bench_function(BenchmarkId::new("get_bytes", size), |b| {
            b.to_async(&rt)
                .iter(|| async { black_box(cache.get_bytes("hot").await) })
        });
    }

    group.finish();
}

/// Benchmark inserts that keep the cache at its budget
fn bench_adaptive_eviction(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let payload = generate_payload(1024);
    let cache = adaptive_cache(256 * 1024, false);

    c.bench_function("adaptive_cache/set_with_eviction", |b| {
        let mut i = 0u64;
        b.to_async(&rt).iter(|| {
            i += 1;
            let key = format!("evict:{}", i);
            let cache = cache.clone();
            let data = payload.clone();
            async move { cache.set_bytes(&key, data, None).await }
        })
    });
}

/// Benchmark compressed writes and reads through the store
fn bench_adaptive_compressed(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let payload = generate_payload(32 * 1024);
    let mut group = c.benchmark_group("adaptive_compressed");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    for algorithm in [CompressionAlgorithm::Lz4, CompressionAlgorithm::Zstd] {
        let cache = adaptive_cache(64 * 1024 * 1024, true);
        cache.set_transform(algorithm.transform());
        rt.block_on(cache.set_bytes("blob", payload.clone(), None));

        group.bench_function(BenchmarkId::new("get", format!("{:?}", algorithm)), |b| {
            b.to_async(&rt)
                .iter(|| async { black_box(cache.get_bytes("blob").await) })
        });
    }

    group.finish();
}

/// Benchmark TTL cache get on a warm key
fn bench_ttl_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cache: TtlCache<String> = TtlCache::new(
        TtlCacheConfig {
            max_entries: 10_000,
            ..Default::default()
        },
        Arc::new(MemoryStore::new()),
        system_clock(),
    )
    .unwrap();

    rt.block_on(async {
        for i in 0..1000 {
            cache
                .set(&format!("user:{}", i), format!("value-{}", i), None, None)
                .await;
        }
    });

    c.bench_function("ttl_cache/get", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            black_box(cache.get(&format!("user:{}", i % 1000)))
        })
    });
}

criterion_group!(
    benches,
    bench_adaptive_hot_path,
    bench_adaptive_eviction,
    bench_adaptive_compressed,
    bench_ttl_get
);
criterion_main!(benches);
