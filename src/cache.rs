// src/cache.rs - Time-windowed read-through cache with stale fallback
use dashmap::DashMap;
use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::models::{constants, CacheCounters, CacheKeyStatus};
use crate::remote::RemoteFetchError;

// -------------------------------
// Cache entry
// -------------------------------
#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }

    #[inline]
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.age() < window
    }
}

// -------------------------------
// Key helpers (normalize all keys)
// -------------------------------
/// An empty user id selects the public portfolio, same as `None`.
#[inline]
pub fn owner_id(user_id: Option<&str>) -> Option<&str> {
    user_id.filter(|id| !id.is_empty())
}

#[inline]
pub fn portfolio_key(quarter: &str, user_id: Option<&str>) -> String {
    format!(
        "{}{}_{}",
        constants::PORTFOLIO_KEY_PREFIX,
        quarter,
        owner_id(user_id).unwrap_or(constants::PUBLIC_OWNER)
    )
}

#[inline]
pub fn quarters_key(user_id: Option<&str>) -> String {
    format!(
        "{}{}",
        constants::QUARTERS_KEY_PREFIX,
        owner_id(user_id).unwrap_or(constants::PUBLIC_OWNER)
    )
}

// -------------------------------
// Stats
// -------------------------------
#[derive(Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub stale_fallbacks: AtomicU64,
    pub default_fallbacks: AtomicU64,
    pub failures: AtomicU64,
}

impl CacheStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheCounters {
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_fallbacks: self.stale_fallbacks.load(Ordering::Relaxed),
            default_fallbacks: self.default_fallbacks.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// -------------------------------
// ReadThroughCache
// -------------------------------
/// One entry per key. Entries past the freshness window are never evicted;
/// they are refreshed on the next read and serve as the fallback when that
/// refresh fails.
pub struct ReadThroughCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    freshness_window: Duration,
    stats: CacheStats,
}

impl<T: Clone> ReadThroughCache<T> {
    pub fn new(freshness_window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            freshness_window,
            stats: CacheStats::default(),
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    /// Return cached data for `key` if it is younger than the freshness
    /// window, otherwise run `producer`.
    ///
    /// A successful producer result overwrites the entry. On failure the
    /// existing entry is returned regardless of age, then `fallback`, and only
    /// when neither exists is the producer's error returned. Failures never
    /// write to the cache.
    ///
    /// Concurrent misses on the same key each run their producer; the last
    /// one to finish wins.
    pub async fn get_cached_or_fetch<F, Fut>(
        &self,
        key: &str,
        producer: F,
        force_fresh: bool,
        fallback: Option<T>,
    ) -> Result<T, RemoteFetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteFetchError>>,
    {
        if !force_fresh {
            if let Some(data) = self.get_fresh(key) {
                CacheStats::bump(&self.stats.hits);
                debug!("Cache hit for {}", key);
                return Ok(data);
            }
        }

        CacheStats::bump(&self.stats.misses);
        debug!("Cache miss for {} (force_fresh={})", key, force_fresh);

        match producer().await {
            Ok(data) => {
                self.entries
                    .insert(key.to_string(), CacheEntry::new(data.clone()));
                Ok(data)
            }
            Err(err) => {
                if let Some(stale) = self.get_any(key) {
                    CacheStats::bump(&self.stats.stale_fallbacks);
                    warn!("Fetch for {} failed, serving cached data: {}", key, err);
                    return Ok(stale);
                }

                if let Some(fallback) = fallback {
                    CacheStats::bump(&self.stats.default_fallbacks);
                    warn!("Fetch for {} failed, serving fallback data: {}", key, err);
                    return Ok(fallback);
                }

                CacheStats::bump(&self.stats.failures);
                error!("Fetch for {} failed with nothing cached: {}", key, err);
                Err(err)
            }
        }
    }

    fn get_fresh(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(self.freshness_window))
            .map(|entry| entry.data.clone())
    }

    fn get_any(&self, key: &str) -> Option<T> {
        self.entries.get(key).map(|entry| entry.data.clone())
    }

    /// Drop every entry whose key contains `pattern`, or all entries when no
    /// pattern is given. Returns how many entries were removed.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let before = self.entries.len();
        match pattern {
            Some(pattern) => self.entries.retain(|key, _| !key.contains(pattern)),
            None => self.entries.clear(),
        }
        before.saturating_sub(self.entries.len())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key_status(&self) -> Vec<CacheKeyStatus> {
        let mut status: Vec<CacheKeyStatus> = self
            .entries
            .iter()
            .map(|entry| CacheKeyStatus {
                key: entry.key().clone(),
                age_seconds: entry.value().age().as_secs_f64(),
                fresh: entry.value().is_fresh(self.freshness_window),
            })
            .collect();
        status.sort_by(|a, b| a.key.cmp(&b.key));
        status
    }

    pub fn stats(&self) -> CacheCounters {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const WINDOW: Duration = Duration::from_secs(300);

    fn failure() -> RemoteFetchError {
        RemoteFetchError::Http("connection reset".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_skips_producer() {
        let cache = ReadThroughCache::new(WINDOW);
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_cached_or_fetch(
                "k",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                },
                false,
                None,
            )
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;

        let second = cache
            .get_cached_or_fetch(
                "k",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![9])
                },
                false,
                None,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_refetches() {
        let cache = ReadThroughCache::new(WINDOW);
        cache
            .get_cached_or_fetch("k", || async { Ok(1) }, false, None)
            .await
            .unwrap();

        tokio::time::advance(WINDOW).await;

        let value = cache
            .get_cached_or_fetch("k", || async { Ok(2) }, false, None)
            .await
            .unwrap();
        assert_eq!(value, 2);

        // refreshed entry is fresh again
        let value = cache
            .get_cached_or_fetch("k", || async { Ok(3) }, false, None)
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_fresh_bypasses_hit() {
        let cache = ReadThroughCache::new(WINDOW);
        cache
            .get_cached_or_fetch("k", || async { Ok("old") }, false, None)
            .await
            .unwrap();

        let value = cache
            .get_cached_or_fetch("k", || async { Ok("new") }, true, None)
            .await
            .unwrap();
        assert_eq!(value, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_serves_stale_entry_of_any_age() {
        let cache = ReadThroughCache::new(WINDOW);
        cache
            .get_cached_or_fetch("k", || async { Ok("cached") }, false, None)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(7 * 24 * 3600)).await;

        let value = cache
            .get_cached_or_fetch("k", || async { Err(failure()) }, false, Some("fallback"))
            .await
            .unwrap();
        assert_eq!(value, "cached");
        assert_eq!(cache.stats().stale_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_failure_without_entry_uses_fallback() {
        let cache: ReadThroughCache<Vec<u32>> = ReadThroughCache::new(WINDOW);

        let value = cache
            .get_cached_or_fetch("k", || async { Err(failure()) }, false, Some(vec![42]))
            .await
            .unwrap();

        assert_eq!(value, vec![42]);
        assert!(!cache.contains_key("k"));
    }

    #[tokio::test]
    async fn test_failure_without_entry_or_fallback_propagates() {
        let cache: ReadThroughCache<u32> = ReadThroughCache::new(WINDOW);

        let err = cache
            .get_cached_or_fetch("k", || async { Err(failure()) }, false, None)
            .await
            .unwrap_err();

        assert_eq!(err, failure());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_clear_by_substring() {
        let cache = ReadThroughCache::new(WINDOW);
        for key in ["portfolio_Q1_public", "portfolio_Q1_u1", "portfolio_Q2_public"] {
            cache
                .get_cached_or_fetch(key, || async { Ok(()) }, false, None)
                .await
                .unwrap();
        }

        assert_eq!(cache.clear(Some("Q1")), 2);
        assert!(cache.contains_key("portfolio_Q2_public"));
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.clear(None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_construction() {
        assert_eq!(portfolio_key("2024Q1", None), "portfolio_2024Q1_public");
        assert_eq!(portfolio_key("2024Q1", Some("u-1")), "portfolio_2024Q1_u-1");
        assert_eq!(quarters_key(None), "quarters_summary_public");
        assert_ne!(quarters_key(Some("u-1")), quarters_key(None));
        assert_eq!(portfolio_key("2024Q1", Some("")), "portfolio_2024Q1_public");
        assert_eq!(quarters_key(Some("")), quarters_key(None));
    }
}
