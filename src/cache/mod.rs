//! Cache-aside fetching in front of the upstream.
//!
//! [`CacheAside::get_or_fetch`] serves a stored payload while it is within
//! its TTL and otherwise makes exactly one upstream call, storing the result
//! only when that call succeeds. Expiry is evaluated lazily at read time
//! against an injectable [`Clock`].
//!
//! Concurrent misses on the same key are not coalesced: each performs its
//! own upstream call and the last successful write wins.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::resolver::RequestDescriptor;
use crate::upstream::{Upstream, UpstreamError};

pub mod clock;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{CacheEntry, CacheStore};

/// Upper bound on a single upstream call unless configured otherwise.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure of the cache-aside protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The upstream call failed; nothing was written to the store.
    #[error("upstream fetch failed for `{key}`: {source}")]
    UpstreamFetchFailed {
        key: String,
        #[source]
        source: UpstreamError,
    },
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub upstream_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    upstream_failures: AtomicU64,
}

/// The cache-aside fetcher. Sole owner of its [`CacheStore`].
///
/// Constructed once at startup and shared behind an [`Arc`].
pub struct CacheAside {
    store: CacheStore,
    upstream: Arc<dyn Upstream>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    counters: Counters,
}

impl CacheAside {
    /// Creates an empty cache over `upstream`, timed by the system clock.
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self::with_clock(upstream, Arc::new(SystemClock))
    }

    pub fn with_clock(upstream: Arc<dyn Upstream>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: CacheStore::new(),
            upstream,
            clock,
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
            counters: Counters::default(),
        }
    }

    /// Bounds each upstream call by `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Read-only view of the store, for inspection.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Returns the payload for `descriptor`, from the store or the upstream.
    ///
    /// 1. A valid entry under `descriptor.cache_key` that is no older than
    ///    `descriptor.ttl` is returned without any upstream call.
    /// 2. Otherwise one upstream call is made, bounded by the configured timeout.
    /// 3. On success the payload is stored with `descriptor.ttl` and returned.
    /// 4. On failure the store is left untouched and the cause is returned.
    ///
    /// # Errors
    ///
    /// [`FetchError::UpstreamFetchFailed`] on network errors, timeouts,
    /// non-2xx statuses, and malformed or rejected bodies.
    pub async fn get_or_fetch(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<Arc<Value>, FetchError> {
        let key = descriptor.cache_key.as_str();

        if let Some(value) = self.store.get_fresh(key, self.clock.now(), descriptor.ttl) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "cache hit");
            return Ok(value);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, ttl_secs = descriptor.ttl.as_secs(), "cache miss, fetching upstream");

        let fetched = tokio::time::timeout(
            self.timeout,
            self.upstream.fetch(&descriptor.upstream_url, &descriptor.headers),
        )
        .await
        .unwrap_or(Err(UpstreamError::Timeout {
            after: self.timeout,
        }));

        match fetched {
            Ok(payload) => {
                let value = Arc::new(payload);
                self.store.insert(CacheEntry {
                    key: key.to_owned(),
                    value: Arc::clone(&value),
                    stored_at: self.clock.now(),
                    ttl: descriptor.ttl,
                });
                Ok(value)
            }
            Err(source) => {
                self.counters.upstream_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    key,
                    route = %descriptor.route,
                    url = %descriptor.upstream_url,
                    error = %source,
                    "upstream fetch failed"
                );
                Err(FetchError::UpstreamFetchFailed {
                    key: key.to_owned(),
                    source,
                })
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            upstream_failures: self.counters.upstream_failures.load(Ordering::Relaxed),
        }
    }

    /// Removes expired entries now. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.clock.now())
    }

    /// Spawns a task that purges expired entries every `every`.
    ///
    /// Purely a memory bound: reads already treat expired entries as absent.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    info!(purged, remaining = cache.store.len(), "swept expired cache entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::http::Headers;
    use crate::resolver::{Params, Resolver, RouteId, TtlPolicy};

    /// Upstream spy: replays scripted outcomes and counts calls.
    #[derive(Default)]
    struct Spy {
        calls: AtomicU64,
        script: Mutex<Vec<Result<Value, UpstreamError>>>,
        urls: Mutex<Vec<String>>,
    }

    impl Spy {
        fn returning(outcomes: Vec<Result<Value, UpstreamError>>) -> Arc<Self> {
            let spy = Spy::default();
            *spy.script.lock().unwrap() = outcomes.into_iter().rev().collect();
            Arc::new(spy)
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for Spy {
        async fn fetch(&self, url: &str, _headers: &Headers) -> Result<Value, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_owned());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(json!({ "response": "default" })))
        }
    }

    /// Never answers; used to exercise the timeout.
    struct Hang;

    #[async_trait]
    impl Upstream for Hang {
        async fn fetch(&self, _url: &str, _headers: &Headers) -> Result<Value, UpstreamError> {
            std::future::pending().await
        }
    }

    fn descriptor(route: RouteId, pairs: &[(&str, &str)]) -> RequestDescriptor {
        let params: Params = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Resolver::new("https://upstream.test", "key", TtlPolicy::default())
            .resolve(route, &params)
            .unwrap()
    }

    fn live() -> RequestDescriptor {
        descriptor(RouteId::FixturesLive, &[])
    }

    fn setup(spy: &Arc<Spy>) -> (CacheAside, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_timestamp(1_714_521_600));
        let cache = CacheAside::with_clock(spy.clone(), clock.clone());
        (cache, clock)
    }

    fn network_error() -> UpstreamError {
        UpstreamError::Network {
            message: "connection reset".to_owned(),
        }
    }

    #[tokio::test]
    async fn miss_fetches_once_then_hits() {
        let spy = Spy::returning(vec![Ok(json!([1, 2, 3]))]);
        let (cache, _clock) = setup(&spy);
        let d = live();

        let first = cache.get_or_fetch(&d).await.unwrap();
        let second = cache.get_or_fetch(&d).await.unwrap();

        assert_eq!(*first, json!([1, 2, 3]));
        assert_eq!(first, second);
        assert_eq!(spy.calls(), 1);
        assert_eq!(spy.urls.lock().unwrap()[0], "https://upstream.test/fixtures?live=all");
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                hits: 1,
                misses: 1,
                upstream_failures: 0
            }
        );
    }

    #[tokio::test]
    async fn expiry_boundary_with_injected_clock() {
        let spy = Spy::returning(vec![Ok(json!("first")), Ok(json!("second"))]);
        let (cache, clock) = setup(&spy);
        let d = live();
        assert_eq!(d.ttl, Duration::from_secs(60));

        cache.get_or_fetch(&d).await.unwrap();
        clock.advance(Duration::from_secs(59));
        assert_eq!(*cache.get_or_fetch(&d).await.unwrap(), json!("first"));
        assert_eq!(spy.calls(), 1);

        clock.advance(Duration::from_secs(2));
        assert_eq!(*cache.get_or_fetch(&d).await.unwrap(), json!("second"));
        assert_eq!(spy.calls(), 2);
    }

    #[tokio::test]
    async fn every_miss_calls_upstream_exactly_once() {
        let spy = Spy::returning(vec![]);
        let (cache, clock) = setup(&spy);
        let d = live();

        for expected in 1..=3 {
            cache.get_or_fetch(&d).await.unwrap();
            assert_eq!(spy.calls(), expected);
            clock.advance(Duration::from_secs(61));
        }
    }

    #[tokio::test]
    async fn failure_writes_nothing_and_is_not_cached() {
        let spy = Spy::returning(vec![Err(network_error()), Ok(json!("recovered"))]);
        let (cache, _clock) = setup(&spy);
        let d = live();

        let err = cache.get_or_fetch(&d).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::UpstreamFetchFailed {
                key: "fixtures-live".to_owned(),
                source: network_error(),
            }
        );
        assert!(cache.store().peek(&d.cache_key).is_none());
        assert_eq!(cache.stats().upstream_failures, 1);

        // No negative caching: the next call retries.
        assert_eq!(*cache.get_or_fetch(&d).await.unwrap(), json!("recovered"));
        assert_eq!(spy.calls(), 2);
    }

    #[tokio::test]
    async fn failure_on_one_key_leaves_other_entries_untouched() {
        let spy = Spy::returning(vec![
            Ok(json!("standings")),
            Err(UpstreamError::Status { status: 503 }),
        ]);
        let (cache, _clock) = setup(&spy);
        let standings = descriptor(RouteId::Standings, &[("league", "39"), ("season", "2023")]);
        let team = descriptor(RouteId::Team, &[("id", "33")]);

        cache.get_or_fetch(&standings).await.unwrap();
        assert!(cache.get_or_fetch(&team).await.is_err());

        let kept = cache.store().peek(&standings.cache_key).unwrap();
        assert_eq!(*kept.value, json!("standings"));
        assert!(cache.store().peek(&team.cache_key).is_none());
    }

    #[tokio::test]
    async fn stale_value_is_not_served_after_failed_refresh() {
        let spy = Spy::returning(vec![Ok(json!("old")), Err(network_error())]);
        let (cache, clock) = setup(&spy);
        let d = live();

        cache.get_or_fetch(&d).await.unwrap();
        clock.advance(Duration::from_secs(120));
        assert!(cache.get_or_fetch(&d).await.is_err());
        // The stale value is never served after a failed refresh.
        assert!(cache.store().get_fresh(&d.cache_key, clock.now(), d.ttl).is_none());
    }

    #[tokio::test]
    async fn distinct_keys_are_cached_independently() {
        let spy = Spy::returning(vec![Ok(json!("a")), Ok(json!("b"))]);
        let (cache, _clock) = setup(&spy);
        let may_first = descriptor(RouteId::FixturesByDate, &[("date", "2024-05-01")]);
        let may_second = descriptor(RouteId::FixturesByDate, &[("date", "2024-05-02")]);

        assert_eq!(*cache.get_or_fetch(&may_first).await.unwrap(), json!("a"));
        assert_eq!(*cache.get_or_fetch(&may_second).await.unwrap(), json!("b"));
        assert_eq!(*cache.get_or_fetch(&may_first).await.unwrap(), json!("a"));
        assert_eq!(spy.calls(), 2);
    }

    #[tokio::test]
    async fn routes_sharing_a_key_share_one_fetch() {
        let spy = Spy::returning(vec![Ok(json!("may first")), Ok(json!("refreshed"))]);
        let (cache, clock) = setup(&spy);
        let by_date = descriptor(RouteId::FixturesByDate, &[("date", "2024-05-01")]);
        let today = descriptor(RouteId::FixturesToday, &[("date", "2024-05-01")]);
        assert_eq!(by_date.cache_key, today.cache_key);

        cache.get_or_fetch(&by_date).await.unwrap();
        assert_eq!(*cache.get_or_fetch(&today).await.unwrap(), json!("may first"));
        assert_eq!(spy.calls(), 1);

        // Past today's 180s but within by-date's 1800s.
        clock.advance(Duration::from_secs(200));
        assert_eq!(*cache.get_or_fetch(&today).await.unwrap(), json!("refreshed"));
        assert_eq!(spy.calls(), 2);
        assert_eq!(*cache.get_or_fetch(&by_date).await.unwrap(), json!("refreshed"));
        assert_eq!(spy.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_upstream_times_out() {
        let cache = CacheAside::with_clock(
            Arc::new(Hang),
            Arc::new(ManualClock::at_timestamp(0)),
        )
        .timeout(Duration::from_secs(10));

        let err = cache.get_or_fetch(&live()).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::UpstreamFetchFailed {
                source: UpstreamError::Timeout { .. },
                ..
            }
        ));
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn purge_drops_expired_entries() {
        let spy = Spy::returning(vec![]);
        let (cache, clock) = setup(&spy);
        cache.get_or_fetch(&live()).await.unwrap();
        cache
            .get_or_fetch(&descriptor(RouteId::Countries, &[]))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(120));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().entries, 1);
    }
}
