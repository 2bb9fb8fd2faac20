//! Result cache with TTL expiry and a background sweeper.
//!
//! Entries are never served as fresh once older than the expiration, but
//! stay readable (flagged stale) until the sweeper physically removes them.
//! Hit and miss counts are kept with atomics and logged on every sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, expiration: Duration) -> bool {
        self.inserted_at.elapsed() > expiration
    }
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

/// Shared keyed cache. Cloning yields another handle to the same map.
pub struct ResultCache<K, V> {
    entries: Arc<RwLock<HashMap<K, CacheEntry<V>>>>,
    expiration: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
}

impl<K, V> Clone for ResultCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            expiration: self.expiration,
            hits: Arc::clone(&self.hits),
            misses: Arc::clone(&self.misses),
            evictions: Arc::clone(&self.evictions),
        }
    }
}

impl<K, V> ResultCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(expiration: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            expiration,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Insert or replace, resetting the entry's age.
    pub async fn put(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Value and freshness flag. Stale entries are returned until swept.
    pub async fn get(&self, key: &K) -> Option<(V, bool)> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .map(|entry| (entry.value.clone(), !entry.is_expired(self.expiration)))
    }

    /// Value only if fresh. Counts toward hit/miss stats.
    pub async fn get_fresh(&self, key: &K) -> Option<V> {
        match self.get(key).await {
            Some((value, true)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remove every expired entry. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(self.expiration));
        let removed = before - entries.len();
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len().await,
        }
    }

    /// Sweep every `interval` until `shutdown` flips.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            debug!(?interval, "cache sweeper started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let removed = cache.sweep().await;
                        if removed > 0 {
                            let stats = cache.stats().await;
                            info!(
                                removed,
                                size = stats.size,
                                hits = stats.hits,
                                misses = stats.misses,
                                "cache swept"
                            );
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("cache sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_until_expiration() {
        let cache = ResultCache::new(Duration::from_secs(10));
        cache.put("a", 1).await;

        assert_eq!(cache.get(&"a").await, Some((1, true)));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get_fresh(&"a").await, Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get_fresh(&"a").await, None);
        // Still readable as stale until swept.
        assert_eq!(cache.get(&"a").await, Some((1, false)));
        assert_eq!(cache.get(&"missing").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_resets_age() {
        let cache = ResultCache::new(Duration::from_secs(10));
        cache.put("a", 1).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put("a", 2).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get_fresh(&"a").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = ResultCache::new(Duration::from_secs(10));
        cache.put("old", 1).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.put("new", 2).await;
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.get(&"old").await, None);
        assert_eq!(cache.get(&"new").await, Some((2, true)));
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_count_hits_and_misses() {
        let cache = ResultCache::new(Duration::from_secs(10));
        cache.put(1u32, "x").await;
        cache.get_fresh(&1).await;
        cache.get_fresh(&1).await;
        cache.get_fresh(&2).await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let cache = ResultCache::new(Duration::from_secs(5));
        cache.put("a", 1).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = cache.spawn_sweeper(Duration::from_secs(2), shutdown_rx);

        // Sweeps at 2s and 4s keep it; the sweep at 6s removes it.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cache.len().await, 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.is_empty().await);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
