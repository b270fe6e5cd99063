//! Request Scheduler
//!
//! Entry point for network work. A request moves through
//! `queued -> cache-check -> (hit: done) | (miss: pool-wait -> in-flight ->
//! (success: cache-store -> done) | (failure: retry-wait -> pool-wait) |
//! (retries exhausted: failed))`.
//!
//! Cache lookups and stores go through the [`AdaptiveCache`]; admission is
//! delegated to the [`AdmissionController`] and attempts to the
//! [`RetryCoordinator`].

use super::batch::BatchCoordinator;
use super::pool::{AdmissionController, ConnectionPool};
use super::retry::{RetryCoordinator, RetryPolicy};
use super::transport::{SharedTransport, StatusClassifier, default_classifier};
use super::types::{
    CachedResponse, NetworkRequest, NetworkResponse, SchedulerStats, TransportResponse,
};
use crate::cache::AdaptiveCache;
use crate::core::clock::{SharedClock, duration_ms};
use crate::core::error::{ConfigError, NetworkError};
use crate::metrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_connections_per_host: usize,
    pub max_concurrent_requests: usize,
    /// Default for requests without their own `max_retries`
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Default for requests without their own `timeout`
    pub default_timeout_ms: u64,
    /// TTL for cached responses of requests without a `cache_ttl`
    pub default_cache_ttl_ms: u64,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 6,
            max_concurrent_requests: 10,
            max_retries: 3,
            base_delay_ms: 1000,
            default_timeout_ms: 10_000,
            default_cache_ttl_ms: 5 * 60 * 1000,
            batch_size: 5,
            batch_timeout_ms: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_non_zero(
            "max_connections_per_host",
            self.max_connections_per_host as u64,
        )?;
        ConfigError::require_non_zero(
            "max_concurrent_requests",
            self.max_concurrent_requests as u64,
        )?;
        ConfigError::require_non_zero("default_timeout_ms", self.default_timeout_ms)?;
        ConfigError::require_non_zero("default_cache_ttl_ms", self.default_cache_ttl_ms)?;
        ConfigError::require_non_zero("batch_size", self.batch_size as u64)?;
        Ok(())
    }

    fn policy_for(&self, request: &NetworkRequest) -> RetryPolicy {
        RetryPolicy {
            max_retries: request.max_retries.unwrap_or(self.max_retries),
            base_delay: Duration::from_millis(self.base_delay_ms),
            timeout: request
                .timeout
                .unwrap_or(Duration::from_millis(self.default_timeout_ms)),
        }
    }
}

#[derive(Default)]
struct Counters {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    timeouts: u64,
    retries: u64,
    cache_hits: u64,
    cache_misses: u64,
    total_response_time_ms: u64,
    bandwidth_bytes: u64,
}

struct Inner {
    config: RwLock<SchedulerConfig>,
    cache: AdaptiveCache,
    admission: Arc<AdmissionController>,
    retry: RetryCoordinator,
    counters: RwLock<Counters>,
}

/// Priority-aware request scheduler with response caching
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<Inner>,
}

impl RequestScheduler {
    /// Create a scheduler using the default status classification
    pub fn new(
        config: SchedulerConfig,
        cache: AdaptiveCache,
        transport: SharedTransport,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        Self::with_classifier(config, cache, transport, clock, default_classifier())
    }

    /// Create a scheduler with a custom status classification
    pub fn with_classifier(
        config: SchedulerConfig,
        cache: AdaptiveCache,
        transport: SharedTransport,
        clock: SharedClock,
        classifier: StatusClassifier,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Initializing request scheduler per_host={}, concurrent={}, retries={}, batch={}",
            config.max_connections_per_host,
            config.max_concurrent_requests,
            config.max_retries,
            config.batch_size
        );

        let admission = AdmissionController::new(
            config.max_connections_per_host,
            config.max_concurrent_requests,
            clock,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                cache,
                admission,
                retry: RetryCoordinator::new(transport, classifier),
                counters: RwLock::new(Counters::default()),
            }),
        })
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.config.read().clone()
    }

    /// Apply a new configuration; in-flight requests keep their admission
    pub fn configure(&self, config: SchedulerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        info!(
            "Reconfigured request scheduler per_host={}, concurrent={}",
            config.max_connections_per_host, config.max_concurrent_requests
        );
        self.inner.admission.set_limits(
            config.max_connections_per_host,
            config.max_concurrent_requests,
        );
        *self.inner.config.write() = config;
        Ok(())
    }

    /// The response cache
    pub fn cache(&self) -> &AdaptiveCache {
        &self.inner.cache
    }

    /// Submit a request
    ///
    /// Work starts immediately on a spawned task, so dropping the returned
    /// future does not cancel it. Must be called within a tokio runtime.
    pub fn submit(
        &self,
        request: NetworkRequest,
    ) -> impl Future<Output = Result<NetworkResponse, NetworkError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.execute(request).await });
        async move {
            handle
                .await
                .map_err(|e| NetworkError::Internal(format!("request task failed: {}", e)))?
        }
    }

    /// Submit requests in paced batches; results keep input order
    pub async fn submit_batch(
        &self,
        requests: Vec<NetworkRequest>,
    ) -> Vec<Result<NetworkResponse, NetworkError>> {
        let (batch_size, pacing) = {
            let config = self.inner.config.read();
            (
                config.batch_size,
                Duration::from_millis(config.batch_timeout_ms),
            )
        };
        BatchCoordinator::new(self.clone(), batch_size, pacing)
            .run(requests)
            .await
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = self.inner.counters.read();
        SchedulerStats {
            total_requests: counters.total_requests,
            successful_requests: counters.successful_requests,
            failed_requests: counters.failed_requests,
            timeouts: counters.timeouts,
            retries: counters.retries,
            cache_hits: counters.cache_hits,
            cache_misses: counters.cache_misses,
            total_response_time_ms: counters.total_response_time_ms,
            bandwidth_bytes: counters.bandwidth_bytes,
            in_flight: self.inner.admission.in_flight(),
            queued: self.inner.admission.queued(),
        }
    }

    pub fn reset_stats(&self) {
        *self.inner.counters.write() = Counters::default();
    }

    pub fn pool_stats(&self) -> Vec<ConnectionPool> {
        self.inner.admission.pool_stats()
    }

    /// Drop every cached response
    pub async fn clear_cache(&self) {
        info!("Clearing scheduler response cache");
        self.inner.cache.clear().await;
    }
}

impl Inner {
    async fn execute(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        let started = Instant::now();
        self.counters.write().total_requests += 1;

        let host = match request.host() {
            Ok(host) => host,
            Err(e) => {
                self.finish_failure(&request, started);
                return Err(e);
            }
        };

        let cache_key = request.cacheable.then(|| request.cache_key());
        if let Some(key) = &cache_key {
            if let Some(response) = self.lookup_cached(key, started).await {
                debug!("Cache hit for {} {}", request.method, request.url);
                self.counters.write().cache_hits += 1;
                self.finish_success(&request, started, 0, "cache_hit");
                return Ok(response);
            }
            self.counters.write().cache_misses += 1;
        }

        let policy = self.config.read().policy_for(&request);
        let admission = Arc::clone(&self.admission);
        let priority = request.priority;
        let outcome = self
            .retry
            .execute(&request, &policy, move || {
                let admission = Arc::clone(&admission);
                let host = host.clone();
                async move { admission.acquire(&host, priority).await }
            })
            .await;

        {
            let mut counters = self.counters.write();
            counters.retries += u64::from(outcome.retry_count);
            counters.timeouts += u64::from(outcome.timeouts);
        }

        let response = match outcome.result {
            Ok(response) => response,
            Err(e) => {
                self.finish_failure(&request, started);
                return Err(e);
            }
        };

        let request_bytes = request.body.as_ref().map_or(0, |b| b.len());
        self.finish_success(
            &request,
            started,
            request_bytes + response.body.len(),
            "success",
        );

        if let Some(key) = &cache_key {
            // Only 2xx responses are cached, whatever the classifier accepts
            if (200..300).contains(&response.status) {
                self.store_cached(&request, key, &response).await;
            }
        }

        Ok(NetworkResponse {
            data: response.body,
            status_code: response.status,
            headers: response.headers,
            response_time: started.elapsed(),
            served_from_cache: false,
            retry_count: outcome.retry_count,
        })
    }

    async fn store_cached(
        &self,
        request: &NetworkRequest,
        key: &str,
        response: &TransportResponse,
    ) {
        let ttl = request
            .cache_ttl
            .unwrap_or(Duration::from_millis(self.config.read().default_cache_ttl_ms));
        let cached = CachedResponse::from_transport(response);
        match self.cache.set(key, &cached, Some(ttl)).await {
            Ok(true) => debug!("Cached response for {} {}", request.method, request.url),
            Ok(false) => debug!("Response for {} not cached (budget)", request.url),
            Err(e) => warn!("Failed to cache response for {}: {}", request.url, e),
        }
    }

    async fn lookup_cached(&self, key: &str, started: Instant) -> Option<NetworkResponse> {
        let cached: CachedResponse = self.cache.get(key).await?;
        cached.into_response(started.elapsed())
    }

    fn finish_success(
        &self,
        request: &NetworkRequest,
        started: Instant,
        bytes: usize,
        outcome: &str,
    ) {
        let elapsed = started.elapsed();
        {
            let mut counters = self.counters.write();
            counters.successful_requests += 1;
            counters.total_response_time_ms += duration_ms(elapsed);
            counters.bandwidth_bytes += bytes as u64;
        }
        metrics::record_request(outcome, request.priority.as_str(), elapsed.as_secs_f64());
    }

    fn finish_failure(&self, request: &NetworkRequest, started: Instant) {
        let elapsed = started.elapsed();
        {
            let mut counters = self.counters.write();
            counters.failed_requests += 1;
            counters.total_response_time_ms += duration_ms(elapsed);
        }
        metrics::record_request("failure", request.priority.as_str(), elapsed.as_secs_f64());
    }
}
