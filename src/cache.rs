//! Time-expiring single-value caches.
//!
//! Each cache owns one value and a freshness window. `get_or_build` returns
//! the cached value while it is fresh, otherwise runs the supplied builder
//! and replaces the whole value. A failed rebuild degrades to the previous
//! (stale) value when one exists, so upstream hiccups never propagate past
//! the cache once it has been primed.
//!
//! Concurrent rebuilds of an expired cache may race; the value is replaced
//! wholesale, so the worst case is redundant work, never a torn value.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

struct Entry<T> {
    value: Arc<T>,
    refreshed: Instant,
    refreshed_at: DateTime<Utc>,
}

pub struct TtlCache<T> {
    ttl: Duration,
    slot: RwLock<Option<Entry<T>>>,
}

impl<T: Send + Sync> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Return the cached value if fresh, otherwise rebuild it.
    ///
    /// On builder failure the previous value is returned when one exists;
    /// the error only surfaces when the cache has never been filled.
    pub async fn get_or_build<E, F, Fut>(&self, build: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Some(value) = self.fresh().await {
            return Ok(value);
        }

        match build().await {
            Ok(value) => {
                let value = Arc::new(value);
                let mut slot = self.slot.write().await;
                *slot = Some(Entry {
                    value: Arc::clone(&value),
                    refreshed: Instant::now(),
                    refreshed_at: Utc::now(),
                });
                Ok(value)
            }
            Err(err) => {
                let slot = self.slot.read().await;
                match slot.as_ref() {
                    Some(entry) => {
                        tracing::warn!(error = %err, "cache rebuild failed, serving stale value");
                        Ok(Arc::clone(&entry.value))
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Drop the cached value so the next read rebuilds.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        *slot = None;
    }

    /// When the value was last rebuilt, if ever.
    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.slot.read().await.as_ref().map(|e| e.refreshed_at)
    }

    /// Age of the cached value.
    pub async fn age(&self) -> Option<Duration> {
        self.slot.read().await.as_ref().map(|e| e.refreshed.elapsed())
    }

    async fn fresh(&self) -> Option<Arc<T>> {
        let slot = self.slot.read().await;
        let entry = slot.as_ref()?;
        if entry.refreshed.elapsed() < self.ttl {
            Some(Arc::clone(&entry.value))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn builds_once_while_fresh() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_build(|| async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(7)
                })
                .await
                .unwrap();
            assert_eq!(*value, 7);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rebuilds_after_expiry() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(0));
        let builds = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_build(|| async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(1)
                })
                .await
                .unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_rebuild_serves_stale_value() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(0));
        cache
            .get_or_build(|| async { Ok::<_, String>(42) })
            .await
            .unwrap();

        let value = cache
            .get_or_build(|| async { Err::<u32, _>("upstream down".to_string()) })
            .await
            .unwrap();
        assert_eq!(*value, 42);
    }

    #[tokio::test]
    async fn failure_with_empty_cache_surfaces() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let err = cache
            .get_or_build(|| async { Err::<u32, _>("upstream down".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, "upstream down");
        assert!(cache.last_refresh().await.is_none());
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let builds = AtomicUsize::new(0);

        let build = || async {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(5)
        };
        cache.get_or_build(build).await.unwrap();
        cache.invalidate().await;
        assert!(cache.age().await.is_none());
        cache
            .get_or_build(|| async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(5)
            })
            .await
            .unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
