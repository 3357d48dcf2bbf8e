//! TTL response cache with single-flight regeneration.
//!
//! One cache instance guards one precomputed serialized response. While the
//! entry is fresh, `get` returns the shared payload with zero regeneration
//! work. On expiry the first caller takes the regeneration right (an async
//! mutex), rebuilds the entry, and publishes it with an atomic swap;
//! concurrent misses queue on the same mutex and all observe the leader's
//! result instead of duplicating the expensive generation.
//!
//! With no TTL configured the cache never expires — the unconditional
//! in-memory variant is the degenerate case of the same mechanism.

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::source::ItemSource;
use chrono::{DateTime, Utc};
use serde_json::value::RawValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Behavior when a regeneration fails or is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Failures propagate to the caller; requests arriving during an
    /// in-flight regeneration wait for its result.
    #[default]
    FailClosed,
    /// Serve the stale entry (when one exists) instead of waiting on an
    /// in-flight regeneration, and fall back to it on generation failure.
    FailOpen,
}

/// One published snapshot. Never mutated, only replaced wholesale.
struct CacheEntry {
    /// Pre-serialized items JSON; hits reuse it without re-encoding.
    payload: Arc<RawValue>,
    /// Wall-clock generation time, reported as `fetchedAt`.
    fetched_at: DateTime<Utc>,
    created: Instant,
    /// `created + ttl`; `None` means the entry never expires.
    expires: Option<Instant>,
}

/// Result of a cache lookup.
pub struct CacheOutcome {
    pub payload: Arc<RawValue>,
    pub fetched_at: DateTime<Utc>,
    pub hit: bool,
    /// True only under [`StalePolicy::FailOpen`] when an expired entry was
    /// served instead of waiting for (or instead of a failed) regeneration.
    pub stale: bool,
    /// Entry age at lookup time; zero for freshly generated entries.
    pub age: Duration,
    /// Wall-clock cost of the generation that produced this payload;
    /// `None` on hits.
    pub generation_cost: Option<Duration>,
}

/// Read-only counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub requests: u64,
    pub hits: u64,
    /// `hits / requests`, 0.0 when no requests have been made.
    pub hit_rate: f64,
    /// Time until the current entry expires; zero when no entry exists or
    /// the entry never expires.
    pub valid_remaining: Duration,
}

struct Inner {
    current: RwLock<Option<Arc<CacheEntry>>>,
    /// The single regeneration right. At most one `generate` call is in
    /// flight per cache instance; the guard is released on every exit path.
    regen: Mutex<()>,
    requests: AtomicU64,
    hits: AtomicU64,
    ttl: Option<Duration>,
    policy: StalePolicy,
    clock: Arc<dyn Clock>,
    source: Arc<dyn ItemSource>,
}

/// Shared single-slot response cache. Clone-cheap.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

impl ResponseCache {
    /// Create a cache over `source`. A `ttl` of `None` (or zero) means
    /// entries never expire until an explicit [`reset`](Self::reset).
    pub fn new(source: Arc<dyn ItemSource>, ttl: Option<Duration>, policy: StalePolicy) -> Self {
        Self::with_clock(source, ttl, policy, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new) with an injected clock, for deterministic
    /// expiry tests.
    pub fn with_clock(
        source: Arc<dyn ItemSource>,
        ttl: Option<Duration>,
        policy: StalePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: RwLock::new(None),
                regen: Mutex::new(()),
                requests: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                ttl: ttl.filter(|d| !d.is_zero()),
                policy,
                clock,
                source,
            }),
        }
    }

    /// Serve the cached payload, regenerating it first if stale or absent.
    ///
    /// Hits never block on a concurrent miss's regeneration. Concurrent
    /// misses coalesce: one caller generates, the rest receive the same
    /// published entry.
    pub async fn get(&self) -> Result<CacheOutcome> {
        let inner = &self.inner;
        inner.requests.fetch_add(1, Ordering::Relaxed);

        if let Some(outcome) = self.try_hit() {
            return Ok(outcome);
        }

        // Miss. Under fail-open, prefer serving the stale entry over
        // queueing behind an in-flight regeneration.
        if inner.policy == StalePolicy::FailOpen {
            match inner.regen.try_lock() {
                Ok(guard) => return self.regenerate(guard).await,
                Err(_) => {
                    if let Some(outcome) = self.stale_outcome() {
                        debug!("cache STALE-SERVE: regeneration in flight");
                        return Ok(outcome);
                    }
                    // No entry exists yet, nothing to serve — wait below.
                }
            }
        }

        let guard = inner.regen.lock().await;

        // A coalesced follower finds the entry the leader just published.
        if let Some(outcome) = self.try_hit() {
            return Ok(outcome);
        }

        self.regenerate(guard).await
    }

    /// Run one generation under the held regeneration right and publish
    /// the result. The guard drops on every return path.
    async fn regenerate(&self, _guard: MutexGuard<'_, ()>) -> Result<CacheOutcome> {
        let inner = &self.inner;

        let generated = match inner.source.generate(None).await {
            Ok(generated) => generated,
            Err(e) => {
                // Never publish a partial entry; the prior one (if any)
                // stays in place for the next attempt.
                if inner.policy == StalePolicy::FailOpen {
                    if let Some(outcome) = self.stale_outcome() {
                        warn!("regeneration failed, serving stale entry: {}", e);
                        return Ok(outcome);
                    }
                }
                return Err(e);
            }
        };

        let payload: Arc<RawValue> =
            Arc::from(RawValue::from_string(serde_json::to_string(&generated.items)?)?);

        let now = inner.clock.now();
        let entry = Arc::new(CacheEntry {
            payload,
            fetched_at: Utc::now(),
            created: now,
            expires: inner.ttl.map(|ttl| now + ttl),
        });

        *inner.current.write().unwrap_or_else(|e| e.into_inner()) = Some(entry.clone());
        debug!(
            cost_ms = generated.elapsed.as_millis() as u64,
            "cache MISS: published fresh entry"
        );

        Ok(CacheOutcome {
            payload: entry.payload.clone(),
            fetched_at: entry.fetched_at,
            hit: false,
            stale: false,
            age: Duration::ZERO,
            generation_cost: Some(generated.elapsed),
        })
    }

    /// Drop the current entry and zero both counters. Idempotent.
    pub fn reset(&self) {
        let inner = &self.inner;
        *inner.current.write().unwrap_or_else(|e| e.into_inner()) = None;
        inner.requests.store(0, Ordering::Relaxed);
        inner.hits.store(0, Ordering::Relaxed);
        debug!("cache reset");
    }

    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        let requests = inner.requests.load(Ordering::Relaxed);
        let hits = inner.hits.load(Ordering::Relaxed);
        let hit_rate = if requests == 0 {
            0.0
        } else {
            hits as f64 / requests as f64
        };
        let valid_remaining = self
            .current()
            .and_then(|entry| entry.expires)
            .map(|expires| expires.saturating_duration_since(inner.clock.now()))
            .unwrap_or(Duration::ZERO);

        CacheStats {
            requests,
            hits,
            hit_rate,
            valid_remaining,
        }
    }

    fn current(&self) -> Option<Arc<CacheEntry>> {
        self.inner
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Return a hit outcome if the current entry is fresh.
    fn try_hit(&self) -> Option<CacheOutcome> {
        let entry = self.current()?;
        let now = self.inner.clock.now();

        // Strict comparison: an entry exactly at its expiry instant is stale.
        let fresh = entry.expires.is_none_or(|expires| now < expires);
        if !fresh {
            return None;
        }

        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        debug!("cache HIT");
        Some(CacheOutcome {
            payload: entry.payload.clone(),
            fetched_at: entry.fetched_at,
            hit: true,
            stale: false,
            age: now.saturating_duration_since(entry.created),
            generation_cost: None,
        })
    }

    /// Return the current entry regardless of freshness (fail-open paths).
    fn stale_outcome(&self) -> Option<CacheOutcome> {
        let entry = self.current()?;
        let now = self.inner.clock.now();

        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        Some(CacheOutcome {
            payload: entry.payload.clone(),
            fetched_at: entry.fetched_at,
            hit: true,
            stale: true,
            age: now.saturating_duration_since(entry.created),
            generation_cost: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::CachemarkError;
    use crate::source::{Generated, Item, ItemSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64};

    /// Source that counts invocations and emits a payload unique per call,
    /// so tests can tell generations apart.
    struct CountingSource {
        calls: AtomicU64,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicU64::new(0),
                delay,
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ItemSource for CountingSource {
        async fn generate(&self, _category: Option<&str>) -> Result<Generated> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(Generated {
                items: vec![Item {
                    id: n as u32,
                    name: format!("generation {n}"),
                    description: "test".to_string(),
                    price: 1,
                    category: "Books".to_string(),
                }],
                elapsed: self.delay,
            })
        }
    }

    /// Source that fails while the flag is set.
    struct FlakySource {
        calls: AtomicU64,
        failing: AtomicBool,
    }

    impl FlakySource {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
                failing: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ItemSource for FlakySource {
        async fn generate(&self, _category: Option<&str>) -> Result<Generated> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing.load(Ordering::SeqCst) {
                return Err(CachemarkError::Generation("simulated outage".to_string()));
            }
            Ok(Generated {
                items: vec![Item {
                    id: n as u32,
                    name: format!("generation {n}"),
                    description: "test".to_string(),
                    price: 1,
                    category: "Books".to_string(),
                }],
                elapsed: Duration::ZERO,
            })
        }
    }

    fn ttl_cache_with_clock(
        source: Arc<dyn ItemSource>,
        ttl_secs: u64,
        policy: StalePolicy,
    ) -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = ResponseCache::with_clock(
            source,
            Some(Duration::from_secs(ttl_secs)),
            policy,
            clock.clone(),
        );
        (cache, clock)
    }

    #[tokio::test]
    async fn gets_within_ttl_reuse_one_generation() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let (cache, clock) = ttl_cache_with_clock(source.clone(), 60, StalePolicy::FailClosed);

        let first = cache.get().await.unwrap();
        assert!(!first.hit);
        assert!(first.generation_cost.is_some());

        clock.advance(Duration::from_secs(1));
        let second = cache.get().await.unwrap();
        assert!(second.hit);
        assert!(second.generation_cost.is_none());
        assert_eq!(first.payload.get(), second.payload.get());
        assert_eq!(second.age, Duration::from_secs(1));

        clock.advance(Duration::from_secs(30));
        let third = cache.get().await.unwrap();
        assert!(third.hit);
        assert_eq!(first.payload.get(), third.payload.get());

        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn entry_exactly_at_expiry_is_stale() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let (cache, clock) = ttl_cache_with_clock(source.clone(), 60, StalePolicy::FailClosed);

        cache.get().await.unwrap();
        clock.advance(Duration::from_secs(60));

        let outcome = cache.get().await.unwrap();
        assert!(!outcome.hit, "entry at its expiry instant must be a miss");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn expiry_triggers_exactly_one_new_generation() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let (cache, clock) = ttl_cache_with_clock(source.clone(), 60, StalePolicy::FailClosed);

        let first = cache.get().await.unwrap();
        clock.advance(Duration::from_secs(61));

        let renewed = cache.get().await.unwrap();
        assert!(!renewed.hit);
        assert_ne!(first.payload.get(), renewed.payload.get());
        assert_eq!(source.calls(), 2);

        // The renewed entry is fresh again.
        let hit = cache.get().await.unwrap();
        assert!(hit.hit);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn unconditional_cache_never_expires() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let clock = Arc::new(ManualClock::new());
        let cache =
            ResponseCache::with_clock(source.clone(), None, StalePolicy::FailClosed, clock.clone());

        cache.get().await.unwrap();
        clock.advance(Duration::from_secs(1_000_000));

        let outcome = cache.get().await.unwrap();
        assert!(outcome.hit);
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.stats().valid_remaining, Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_ttl_means_cache_forever() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let clock = Arc::new(ManualClock::new());
        let cache = ResponseCache::with_clock(
            source.clone(),
            Some(Duration::ZERO),
            StalePolicy::FailClosed,
            clock.clone(),
        );

        cache.get().await.unwrap();
        clock.advance(Duration::from_secs(3600));
        assert!(cache.get().await.unwrap().hit);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn counter_worked_example() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let (cache, clock) = ttl_cache_with_clock(source.clone(), 60, StalePolicy::FailClosed);

        cache.get().await.unwrap(); // t=0: miss
        clock.advance(Duration::from_secs(1));
        cache.get().await.unwrap(); // t=1s: hit
        clock.advance(Duration::from_secs(60));
        cache.get().await.unwrap(); // t=61s: miss

        let stats = cache.stats();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn reset_clears_entry_and_counters() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let (cache, clock) = ttl_cache_with_clock(source.clone(), 60, StalePolicy::FailClosed);

        cache.get().await.unwrap();
        clock.advance(Duration::from_secs(1));
        cache.get().await.unwrap();

        cache.reset();
        let stats = cache.stats();
        assert_eq!(
            stats,
            CacheStats {
                requests: 0,
                hits: 0,
                hit_rate: 0.0,
                valid_remaining: Duration::ZERO,
            }
        );

        // Next get is a miss again.
        let outcome = cache.get().await.unwrap();
        assert!(!outcome.hit);
        assert_eq!(source.calls(), 2);

        // Reset is idempotent.
        cache.reset();
        cache.reset();
        assert_eq!(cache.stats().requests, 0);
    }

    #[tokio::test]
    async fn hit_rate_is_zero_without_requests() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let (cache, _clock) = ttl_cache_with_clock(source, 60, StalePolicy::FailClosed);

        assert_eq!(cache.stats().hit_rate, 0.0);

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        let stats = cache.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
        assert!(stats.hits <= stats.requests);
    }

    #[tokio::test]
    async fn valid_remaining_counts_down() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let (cache, clock) = ttl_cache_with_clock(source, 60, StalePolicy::FailClosed);

        assert_eq!(cache.stats().valid_remaining, Duration::ZERO);

        cache.get().await.unwrap();
        assert_eq!(cache.stats().valid_remaining, Duration::from_secs(60));

        clock.advance(Duration::from_secs(20));
        assert_eq!(cache.stats().valid_remaining, Duration::from_secs(40));

        clock.advance(Duration::from_secs(50));
        assert_eq!(cache.stats().valid_remaining, Duration::ZERO);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_into_one_generation() {
        let source = Arc::new(CountingSource::new(Duration::from_millis(50)));
        let cache = ResponseCache::new(
            source.clone(),
            Some(Duration::from_secs(60)),
            StalePolicy::FailClosed,
        );

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get().await.unwrap() }));
        }

        let mut payloads = Vec::new();
        for handle in handles {
            payloads.push(handle.await.unwrap().payload);
        }

        assert_eq!(
            source.calls(),
            1,
            "concurrent first-calls must coalesce into one generation"
        );
        for payload in &payloads[1..] {
            assert_eq!(payload.get(), payloads[0].get());
        }

        // One leader miss, nine coalesced followers served from the cache.
        let stats = cache.stats();
        assert_eq!(stats.requests, 10);
        assert_eq!(stats.hits, 9);
    }

    #[tokio::test]
    async fn failed_regeneration_is_fail_closed_by_default() {
        let source = Arc::new(FlakySource::new());
        let (cache, clock) = ttl_cache_with_clock(source.clone(), 60, StalePolicy::FailClosed);

        let first = cache.get().await.unwrap();

        clock.advance(Duration::from_secs(61));
        source.failing.store(true, Ordering::SeqCst);

        let err = cache.get().await;
        assert!(err.is_err(), "fail-closed must surface the generation error");

        // The coordinator stays usable: the next successful attempt
        // regenerates and publishes a new entry.
        source.failing.store(false, Ordering::SeqCst);
        let recovered = cache.get().await.unwrap();
        assert!(!recovered.hit);
        assert_ne!(first.payload.get(), recovered.payload.get());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_regeneration_serves_stale_when_fail_open() {
        let source = Arc::new(FlakySource::new());
        let (cache, clock) = ttl_cache_with_clock(source.clone(), 60, StalePolicy::FailOpen);

        let first = cache.get().await.unwrap();

        clock.advance(Duration::from_secs(61));
        source.failing.store(true, Ordering::SeqCst);

        let outcome = cache.get().await.unwrap();
        assert!(outcome.stale);
        assert_eq!(outcome.payload.get(), first.payload.get());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fail_open_first_population_still_propagates_errors() {
        let source = Arc::new(FlakySource::new());
        source.failing.store(true, Ordering::SeqCst);
        let (cache, _clock) = ttl_cache_with_clock(source, 60, StalePolicy::FailOpen);

        // No prior entry exists, so there is nothing stale to fall back to.
        assert!(cache.get().await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fail_open_serves_stale_during_inflight_regeneration() {
        let source = Arc::new(CountingSource::new(Duration::from_millis(100)));
        let cache = ResponseCache::new(
            source.clone(),
            Some(Duration::from_millis(10)),
            StalePolicy::FailOpen,
        );

        let first = cache.get().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await; // let it go stale

        // Leader takes the regeneration right and sits in the slow source.
        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A follower is served the stale entry immediately instead of
        // queueing for the remaining ~80ms of regeneration.
        let started = Instant::now();
        let follower = cache.get().await.unwrap();
        assert!(follower.stale);
        assert_eq!(follower.payload.get(), first.payload.get());
        assert!(started.elapsed() < Duration::from_millis(60));

        let fresh = leader.await.unwrap();
        assert!(!fresh.hit);
        assert_ne!(fresh.payload.get(), first.payload.get());
        assert_eq!(source.calls(), 2);
    }
}
