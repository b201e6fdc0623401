//! Collapses identical concurrent queries into one upstream call.
//!
//! Lookup order for a cache key:
//!
//! 1. fresh cache entry → returned immediately, the limiter is never touched;
//! 2. in-flight fetch → the caller awaits the same shared future;
//! 3. otherwise a new fetch is spawned and registered.
//!
//! Steps 1-3 run under one lock, so two racing callers can never both
//! register a fetch for the same key. The fetch runs in its own task and
//! settles through an [`InFlightGuard`], which removes the registry entry
//! (and stores a successful result) even if the fetch panics or is aborted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheMode, ResultCache};
use crate::error::{GovernorError, GovernorResult};

type SharedFetch<V> = Shared<BoxFuture<'static, GovernorResult<V>>>;

/// Counters describing how lookups were satisfied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Served from the result cache.
    pub hits: u64,
    /// Started a new upstream fetch.
    pub misses: u64,
    /// Joined a fetch that was already in flight.
    pub coalesced: u64,
}

struct DedupState<V> {
    cache: ResultCache<V>,
    in_flight: HashMap<String, SharedFetch<V>>,
    stats: DedupStats,
}

pub struct Deduplicator<V> {
    state: Arc<Mutex<DedupState<V>>>,
}

impl<V> Clone for Deduplicator<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<V> Deduplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(DedupState {
                cache: ResultCache::new(cache_ttl),
                in_flight: HashMap::new(),
                stats: DedupStats::default(),
            })),
        }
    }

    /// Returns the result for `key`, calling `make_call` only when neither a
    /// fresh cache entry nor an in-flight fetch exists.
    ///
    /// Every caller joined to a fetch receives the same outcome, errors
    /// included. Errors are never cached.
    pub async fn fetch<F, Fut>(&self, key: String, mode: CacheMode, make_call: F) -> GovernorResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GovernorResult<V>> + Send + 'static,
    {
        let pending = match self.lookup_or_register(key, mode, make_call) {
            Lookup::Cached(value) => return Ok(value),
            Lookup::Pending(pending) => pending,
        };
        pending.await
    }

    fn lookup_or_register<F, Fut>(&self, key: String, mode: CacheMode, make_call: F) -> Lookup<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GovernorResult<V>> + Send + 'static,
    {
        let mut state = self.lock();

        if mode.reads() {
            if let Some(value) = state.cache.get(&key, Instant::now()) {
                state.stats.hits += 1;
                debug!(key = %key, "served from cache");
                return Lookup::Cached(value);
            }
        }

        if let Some(existing) = state.in_flight.get(&key) {
            let existing = existing.clone();
            state.stats.coalesced += 1;
            debug!(key = %key, "joined in-flight fetch");
            return Lookup::Pending(existing);
        }

        state.stats.misses += 1;
        debug!(key = %key, ?mode, "starting upstream fetch");

        let call = make_call();
        let guard = InFlightGuard {
            owner: self.clone(),
            key: key.clone(),
            store: mode.writes(),
            settled: false,
        };
        let handle = tokio::spawn(async move {
            let mut guard = guard;
            let result = call.await;
            guard.settle(&result);
            result
        });
        let pending = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) if join_error.is_panic() => {
                    Err(GovernorError::from_panic(join_error.into_panic().as_ref()))
                }
                Err(_) => Err(GovernorError::Cancelled),
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(key, pending.clone());
        Lookup::Pending(pending)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().cache.remove(key)
    }

    pub fn clear_cache(&self) {
        self.lock().cache.clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.lock().cache.purge_expired(Instant::now())
    }

    pub fn cached_len(&self) -> usize {
        self.lock().cache.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn stats(&self) -> DedupStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, DedupState<V>> {
        self.state
            .lock()
            .expect("deduplicator state lock is not poisoned")
    }
}

enum Lookup<V> {
    Cached(V),
    Pending(SharedFetch<V>),
}

/// Owns one in-flight registration for the lifetime of its fetch task.
struct InFlightGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    owner: Deduplicator<V>,
    key: String,
    store: bool,
    settled: bool,
}

impl<V> InFlightGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Deregisters and, on success, caches in one critical section so no
    /// caller can observe neither the entry nor the registration.
    fn settle(&mut self, result: &GovernorResult<V>) {
        let mut state = self.owner.lock();
        state.in_flight.remove(&self.key);
        if let (true, Ok(value)) = (self.store, result) {
            state
                .cache
                .put(self.key.clone(), value.clone(), Instant::now());
        }
        self.settled = true;
    }
}

impl<V> Drop for InFlightGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.settled {
            self.owner.lock().in_flight.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;

    use super::*;

    fn counting_call(
        calls: &Arc<AtomicUsize>,
        value: GovernorResult<u32>,
        latency: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, GovernorResult<u32>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(latency).await;
                value
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_fetches_share_one_call() {
        let dedup = Deduplicator::new(Duration::from_secs(5));
        let calls = Arc::new(AtomicUsize::new(0));

        let fetches = (0..5).map(|_| {
            dedup.fetch(
                String::from("orders?user=0xabc"),
                CacheMode::Use,
                counting_call(&calls, Ok(42), Duration::from_millis(300)),
            )
        });
        let results = join_all(fetches).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == Ok(42)));
        assert_eq!(
            dedup.stats(),
            DedupStats {
                hits: 0,
                misses: 1,
                coalesced: 4
            }
        );
        assert_eq!(dedup.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_reach_every_waiter_and_are_not_cached() {
        let dedup = Deduplicator::new(Duration::from_secs(5));
        let calls = Arc::new(AtomicUsize::new(0));
        let failure = GovernorError::upstream(500, "boom");

        let first = dedup.fetch(
            String::from("k"),
            CacheMode::Use,
            counting_call(&calls, Err(failure.clone()), Duration::from_millis(100)),
        );
        let second = dedup.fetch(
            String::from("k"),
            CacheMode::Use,
            counting_call(&calls, Ok(1), Duration::ZERO),
        );
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, Err(failure.clone()));
        assert_eq!(second, Err(failure));
        assert_eq!(dedup.cached_len(), 0);

        let retry = dedup
            .fetch(
                String::from("k"),
                CacheMode::Use,
                counting_call(&calls, Ok(7), Duration::ZERO),
            )
            .await;
        assert_eq!(retry, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_serves_until_ttl_then_refetches() {
        let dedup = Deduplicator::new(Duration::from_millis(5_000));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = |value| {
            let dedup = dedup.clone();
            let call = counting_call(&calls, Ok(value), Duration::ZERO);
            async move { dedup.fetch(String::from("k"), CacheMode::Use, call).await }
        };

        assert_eq!(fetch(1).await, Ok(1));
        tokio::time::sleep(Duration::from_millis(4_990)).await;
        assert_eq!(fetch(2).await, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fetch(3).await, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_skips_read_and_bypass_skips_write() {
        let dedup = Deduplicator::new(Duration::from_secs(5));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = dedup
            .fetch(String::from("k"), CacheMode::Use, counting_call(&calls, Ok(1), Duration::ZERO))
            .await;
        let refreshed = dedup
            .fetch(String::from("k"), CacheMode::Refresh, counting_call(&calls, Ok(2), Duration::ZERO))
            .await;
        let bypassed = dedup
            .fetch(String::from("k"), CacheMode::Bypass, counting_call(&calls, Ok(3), Duration::ZERO))
            .await;
        let cached = dedup
            .fetch(String::from("k"), CacheMode::Use, counting_call(&calls, Ok(4), Duration::ZERO))
            .await;

        assert_eq!((first, refreshed, bypassed, cached), (Ok(1), Ok(2), Ok(3), Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_caller_does_not_cancel_the_fetch() {
        let dedup = Deduplicator::new(Duration::from_secs(5));
        let calls = Arc::new(AtomicUsize::new(0));

        let abandoned = tokio::spawn({
            let dedup = dedup.clone();
            let call = counting_call(&calls, Ok(9), Duration::from_millis(500));
            async move { dedup.fetch(String::from("k"), CacheMode::Use, call).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        abandoned.abort();

        tokio::time::sleep(Duration::from_millis(600)).await;
        let later = dedup
            .fetch(String::from("k"), CacheMode::Use, counting_call(&calls, Ok(0), Duration::ZERO))
            .await;

        assert_eq!(later, Ok(9));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_fetch_releases_its_registration() {
        let dedup: Deduplicator<u32> = Deduplicator::new(Duration::from_secs(5));

        let result = dedup
            .fetch(String::from("k"), CacheMode::Use, || async {
                if true {
                    panic!("fetch blew up");
                }
                Ok(1)
            })
            .await;

        assert_eq!(result, Err(GovernorError::task_failed("fetch blew up")));
        assert_eq!(dedup.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_and_purge() {
        let dedup = Deduplicator::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            dedup
                .fetch(String::from(key), CacheMode::Use, counting_call(&calls, Ok(1), Duration::ZERO))
                .await
                .expect("fetch");
        }
        assert!(dedup.invalidate("a"));
        assert!(!dedup.invalidate("a"));
        assert_eq!(dedup.cached_len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(dedup.purge_expired(), 1);
        assert_eq!(dedup.cached_len(), 0);
    }
}
