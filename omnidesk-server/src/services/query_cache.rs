//! Read-through cache for expensive, tenant-scoped read queries.
//!
//! Values are stored type-erased and recovered by downcast, so a single cache
//! can hold conversation lists, template lists and dashboard aggregates side by
//! side. Keys are plain strings; invalidation removes every key containing a
//! substring, which is why all keys produced by [`keys`] end with a `:`.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use metrics::counter;
use shared::{config::server::CacheConfig, models::CacheStats};
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, trace};

/// Builders for the cache keys used by the HTTP layer.
pub mod keys {
    use shared::models::{Channel, ConversationStatus};

    #[must_use]
    pub fn conversations(
        company_id: i64,
        status: Option<ConversationStatus>,
        channel: Option<Channel>,
        limit: i64,
    ) -> String {
        format!(
            "{}{}:{}:{limit}:",
            conversations_prefix(company_id),
            status.map_or("all", ConversationStatus::as_str),
            channel.map_or("all", Channel::as_str),
        )
    }

    /// Prefix shared by every conversation-list key of one company.
    #[must_use]
    pub fn conversations_prefix(company_id: i64) -> String {
        format!("conversations:{company_id}:")
    }

    #[must_use]
    pub fn dashboard(company_id: i64) -> String {
        format!("dashboard:{company_id}:")
    }

    #[must_use]
    pub fn templates(company_id: i64) -> String {
        format!("templates:{company_id}:")
    }
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

pub struct ReadThroughCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    /// Bumped under the write lock by every `invalidate`. A fetch that started
    /// under an older generation must not store its result.
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl fmt::Debug for ReadThroughCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("default_ttl", &self.default_ttl)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ReadThroughCache {
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.default_ttl_seconds))
    }

    /// Returns the cached value for `key`, or runs `fetch` and caches its result.
    ///
    /// A fresh entry is returned without invoking `fetch`. Expired entries are
    /// dropped on read. Errors from `fetch` are handed back to the caller and
    /// never cached. An entry holding a different type than `T` is treated as a
    /// miss and overwritten.
    ///
    /// If `invalidate` runs while `fetch` is in flight, the fetched value is
    /// returned to this caller but not stored, since it may predate the write
    /// that triggered the invalidation. Concurrent misses for the same key may
    /// each run `fetch`; the last writer wins.
    pub async fn get<T, E, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.lookup::<T>(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!("omnidesk_cache_hits_total").increment(1);
            trace!(key, "cache hit");
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("omnidesk_cache_misses_total").increment(1);
        trace!(key, "cache miss");

        let started_at = self.generation.load(Ordering::Acquire);
        let value = fetch().await?;

        let mut entries = self.entries.write().await;
        if self.generation.load(Ordering::Acquire) != started_at {
            debug!(key, "invalidated during fetch, result not cached");
            return Ok(value);
        }
        entries.insert(
            key.to_owned(),
            CacheEntry {
                value: Arc::new(value.clone()),
                expires_at: Instant::now() + ttl.unwrap_or(self.default_ttl),
            },
        );

        Ok(value)
    }

    async fn lookup<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.is_fresh(now) => {
                    return (*entry.value).downcast_ref::<T>().cloned();
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_fresh(now)) {
            entries.remove(key);
        }
        None
    }

    /// Removes every entry whose key contains `pattern` and returns how many
    /// were removed. An empty pattern clears the cache.
    ///
    /// Expired entries are purged on the same pass whether or not they match;
    /// only matches count as invalidations. Fetches still in flight will not
    /// store their results.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let now = Instant::now();
        let (removed, expired) = {
            let mut entries = self.entries.write().await;
            self.generation.fetch_add(1, Ordering::AcqRel);
            let (mut removed, mut expired) = (0usize, 0usize);
            entries.retain(|key, entry| {
                if key.contains(pattern) {
                    removed += 1;
                    false
                } else if !entry.is_fresh(now) {
                    expired += 1;
                    false
                } else {
                    true
                }
            });
            (removed, expired)
        };

        if expired > 0 {
            trace!(expired, "purged expired cache entries");
        }
        if removed > 0 {
            self.invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            counter!("omnidesk_cache_invalidations_total").increment(removed as u64);
            debug!(pattern, removed, "invalidated cache entries");
        }
        removed
    }

    /// Snapshot of the cache counters. `keys` counts only entries that are
    /// still fresh.
    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let keys = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_fresh(now))
            .count();
        CacheStats {
            keys,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{Channel, ConversationStatus};
    use std::{convert::Infallible, sync::atomic::AtomicUsize};
    use tokio::sync::oneshot;

    fn counting_fetch(
        calls: &AtomicUsize,
        value: i64,
    ) -> impl Future<Output = Result<i64, Infallible>> + '_ {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_skips_the_fetch() {
        let cache = ReadThroughCache::new(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);
        let ttl = Some(Duration::from_secs(60));

        let first = cache
            .get("dashboard:1:", || counting_fetch(&calls, 7), ttl)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = cache
            .get("dashboard:1:", || counting_fetch(&calls, 8), ttl)
            .await
            .unwrap();

        assert_eq!((first, second), (7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.keys), (1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let cache = ReadThroughCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let ttl = Some(Duration::from_secs(5));

        cache
            .get("templates:1:", || counting_fetch(&calls, 1), ttl)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        let refreshed = cache
            .get("templates:1:", || counting_fetch(&calls, 2), ttl)
            .await
            .unwrap();

        assert_eq!(refreshed, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn write_invalidation_makes_next_read_fetch_again() {
        let cache = ReadThroughCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let key = keys::conversations(1, Some(ConversationStatus::Open), None, 50);

        cache
            .get(&key, || counting_fetch(&calls, 3), None)
            .await
            .unwrap();
        let removed = cache.invalidate(&keys::conversations_prefix(1)).await;
        assert_eq!(removed, 1);

        let value = cache
            .get(&key, || counting_fetch(&calls, 4), None)
            .await
            .unwrap();
        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().await.invalidations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_overlapping_an_invalidation_is_not_stored() {
        let cache = Arc::new(ReadThroughCache::new(Duration::from_secs(60)));
        let key = keys::conversations(1, Some(ConversationStatus::Open), None, 50);
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let reader = tokio::spawn({
            let cache = Arc::clone(&cache);
            let key = key.clone();
            async move {
                cache
                    .get(
                        &key,
                        || async move {
                            let _ = started_tx.send(());
                            let _ = release_rx.await;
                            Ok::<_, Infallible>("status=open")
                        },
                        None,
                    )
                    .await
            }
        });

        started_rx.await.unwrap();
        // Nothing is stored yet, but the in-flight read must still be voided.
        assert_eq!(cache.invalidate(&keys::conversations_prefix(1)).await, 0);
        release_tx.send(()).unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), "status=open");
        assert_eq!(cache.stats().await.keys, 0);

        let calls = AtomicUsize::new(0);
        let after = cache
            .get(
                &key,
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>("status=resolved")
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(after, "status=resolved");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_purges_expired_entries_without_counting_them() {
        let cache = ReadThroughCache::new(Duration::from_secs(60));
        let short = Some(Duration::from_secs(5));
        for limit in [10, 20, 30] {
            let key = keys::conversations(2, None, None, limit);
            let _: Result<i64, Infallible> = cache.get(&key, || async { Ok(1) }, short).await;
        }
        let _: Result<i64, Infallible> = cache
            .get(&keys::dashboard(2), || async { Ok(9) }, None)
            .await;
        assert_eq!(cache.stats().await.keys, 4);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.stats().await.keys, 1);

        assert_eq!(cache.invalidate(&keys::templates(2)).await, 0);
        assert_eq!(cache.entries.read().await.len(), 1);
        let stats = cache.stats().await;
        assert_eq!((stats.keys, stats.invalidations), (1, 0));
    }

    #[tokio::test]
    async fn fetch_errors_are_not_cached() {
        let cache = ReadThroughCache::new(Duration::from_secs(60));

        let failed: Result<i64, &str> = cache
            .get("dashboard:3:", || async { Err("database down") }, None)
            .await;
        assert_eq!(failed, Err("database down"));
        assert_eq!(cache.stats().await.keys, 0);

        let recovered: Result<i64, &str> =
            cache.get("dashboard:3:", || async { Ok(11) }, None).await;
        assert_eq!(recovered, Ok(11));
    }

    #[tokio::test]
    async fn invalidation_is_tenant_scoped() {
        let cache = ReadThroughCache::new(Duration::from_secs(60));
        for company in [1, 12] {
            let _: Result<i64, Infallible> = cache
                .get(&keys::dashboard(company), || async { Ok(0) }, None)
                .await;
        }

        assert_eq!(cache.invalidate(&keys::dashboard(1)).await, 1);
        assert_eq!(cache.stats().await.keys, 1);
    }

    #[tokio::test]
    async fn empty_pattern_clears_everything() {
        let cache = ReadThroughCache::new(Duration::from_secs(60));
        for key in ["dashboard:1:", "templates:1:", "conversations:2:all:all:50:"] {
            let _: Result<i64, Infallible> = cache.get(key, || async { Ok(1) }, None).await;
        }

        assert_eq!(cache.invalidate("").await, 3);
        assert_eq!(cache.stats().await.keys, 0);
    }

    #[tokio::test]
    async fn type_mismatch_counts_as_miss() {
        let cache = ReadThroughCache::new(Duration::from_secs(60));
        let _: Result<i64, Infallible> = cache.get("k:", || async { Ok(5) }, None).await;

        let text: Result<String, Infallible> =
            cache.get("k:", || async { Ok("five".to_owned()) }, None).await;
        assert_eq!(text.unwrap(), "five");
        assert_eq!(cache.stats().await.misses, 2);
    }

    #[test]
    fn conversation_keys_encode_filters() {
        assert_eq!(
            keys::conversations(4, None, Some(Channel::Email), 25),
            "conversations:4:all:email:25:"
        );
        assert!(
            keys::conversations(4, Some(ConversationStatus::Pending), None, 10)
                .starts_with(&keys::conversations_prefix(4))
        );
    }
}
