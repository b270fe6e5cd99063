//! Memoizing wrapper over a [`TtlCache`]
//!
//! Bundles a key generator and a fetcher so call sites do not repeat the
//! get-or-fetch-then-store dance by hand.

use super::ttl::TtlCache;
use crate::core::types::EntryMeta;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type KeyFn<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;
type FetchFn<A, V, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<V, E>> + Send + Sync>;

/// A fetch function whose results are cached by a generated key
pub struct Memoized<A, V, E> {
    cache: TtlCache<V>,
    key_fn: KeyFn<A>,
    fetch: FetchFn<A, V, E>,
    ttl: Option<Duration>,
    meta: Option<EntryMeta>,
}

impl<A, V, E> Clone for Memoized<A, V, E> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            key_fn: Arc::clone(&self.key_fn),
            fetch: Arc::clone(&self.fetch),
            ttl: self.ttl,
            meta: self.meta.clone(),
        }
    }
}

impl<A, V, E> Memoized<A, V, E>
where
    A: Send + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Send + 'static,
{
    pub fn new<K, F, Fut>(cache: TtlCache<V>, key_fn: K, fetch: F) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self {
            cache,
            key_fn: Arc::new(key_fn),
            fetch: Arc::new(move |args| fetch(args).boxed()),
            ttl: None,
            meta: None,
        }
    }

    /// TTL for stored results (defaults to the cache's default TTL)
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Metadata attached to stored results
    pub fn with_meta(mut self, meta: EntryMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Cache key the wrapper uses for `args`
    pub fn key_for(&self, args: &A) -> String {
        (self.key_fn)(args)
    }

    /// Return the cached result for `args` or fetch and store it
    pub async fn call(&self, args: A) -> Result<V, E> {
        let key = (self.key_fn)(&args);
        let fetch = Arc::clone(&self.fetch);
        self.cache
            .get_or_set(&key, move || fetch(args), self.ttl, self.meta.clone())
            .await
    }

    /// Drop the cached result for `args`
    pub async fn invalidate(&self, args: &A) -> bool {
        self.cache.delete(&self.key_for(args)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ttl::TtlCacheConfig;
    use crate::core::clock::ManualClock;
    use crate::persistence::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(clock: &ManualClock) -> TtlCache<String> {
        TtlCache::new(
            TtlCacheConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_memoized_fetches_once_per_key() {
        let clock = ManualClock::new(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let profile: Memoized<u32, String, String> = Memoized::new(
            cache(&clock),
            |id: &u32| format!("profile:{}", id),
            move |id: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(format!("user-{}", id)) }
            },
        );

        assert_eq!(profile.call(7).await, Ok("user-7".to_string()));
        assert_eq!(profile.call(7).await, Ok("user-7".to_string()));
        assert_eq!(profile.call(8).await, Ok("user-8".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(profile.key_for(&7), "profile:7");
    }

    #[tokio::test]
    async fn test_memoized_ttl_and_invalidate() {
        let clock = ManualClock::new(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let fetcher: Memoized<&'static str, String, String> = Memoized::new(
            cache(&clock),
            |name: &&'static str| name.to_string(),
            move |name: &'static str| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(name.to_uppercase()) }
            },
        )
        .with_ttl(Duration::from_millis(100));

        fetcher.call("a").await.unwrap();
        clock.advance(100);
        fetcher.call("a").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(fetcher.invalidate(&"a").await);
        fetcher.call("a").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_memoized_error_not_cached() {
        let clock = ManualClock::new(0);
        let failing: Memoized<u8, String, String> = Memoized::new(
            cache(&clock),
            |n: &u8| n.to_string(),
            |_n: u8| async { Err("offline".to_string()) },
        );

        assert_eq!(failing.call(1).await, Err("offline".to_string()));
        assert!(!failing.invalidate(&1).await);
    }
}
