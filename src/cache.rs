//! Bounded per-bucket cache of backend handles.
//!
//! Handles are built lazily through a [`BackendFactory`] and evicted least
//! recently used first. Each bucket owns a once-cell: concurrent misses for the
//! same bucket construct exactly one handle, while lookups for other buckets
//! never wait on a construction in progress.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use objfs_store::{BackendFactory, ObjectBackend, StoreOptions};
use tokio::sync::{Mutex, OnceCell};

use crate::error::{FsError, Result};

/// Default number of buckets kept alive.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 10;

/// Hit/miss counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

type Slot = Arc<OnceCell<Arc<dyn ObjectBackend>>>;

pub struct StoreCache {
    protocol: String,
    factory: Arc<dyn BackendFactory>,
    options: StoreOptions,
    capacity: NonZeroUsize,
    entries: Mutex<LruCache<String, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StoreCache {
    /// Create a cache holding at most `capacity` handles.
    pub fn new(
        protocol: impl Into<String>,
        factory: Arc<dyn BackendFactory>,
        options: StoreOptions,
        capacity: usize,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            FsError::InvalidArgument("max_cache_size must be at least 1".to_string())
        })?;
        Ok(Self {
            protocol: protocol.into(),
            factory,
            options,
            capacity,
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Handle for `bucket`, constructing it on a miss.
    ///
    /// The cache lock is only held to find or insert the bucket's slot, never
    /// across construction.
    pub async fn get_or_create(&self, bucket: &str) -> Result<Arc<dyn ObjectBackend>> {
        let slot = self.slot(bucket).await;
        if let Some(handle) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(handle));
        }

        let constructed = AtomicBool::new(false);
        let flag = &constructed;
        let result = slot
            .get_or_try_init(|| async move {
                flag.store(true, Ordering::Relaxed);
                let url = format!("{}://{}", self.protocol, bucket);
                let handle = self.factory.construct(&url, &self.options).await?;
                tracing::info!("Constructed {} backend for '{}'", handle.name(), url);
                Ok::<_, FsError>(handle)
            })
            .await;

        let counter = if constructed.load(Ordering::Relaxed) {
            &self.misses
        } else {
            &self.hits
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(handle) => Ok(Arc::clone(handle)),
            Err(err) => {
                self.discard_empty(bucket, &slot).await;
                Err(err)
            }
        }
    }

    async fn slot(&self, bucket: &str) -> Slot {
        let mut entries = self.entries.lock().await;
        if let Some(slot) = entries.get(bucket) {
            return Arc::clone(slot);
        }
        let slot = Slot::default();
        if let Some((evicted, _)) = entries.push(bucket.to_string(), Arc::clone(&slot)) {
            tracing::debug!("Evicted backend handle for bucket '{}'", evicted);
        }
        slot
    }

    /// Drop a slot whose construction failed so it does not hold capacity.
    async fn discard_empty(&self, bucket: &str, slot: &Slot) {
        let mut entries = self.entries.lock().await;
        let stale = entries
            .peek(bucket)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if stale {
            entries.pop(bucket);
        }
    }

    /// Number of live handles.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Whether `bucket` is cached, without touching its recency.
    pub async fn contains(&self, bucket: &str) -> bool {
        self.entries.lock().await.contains(bucket)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drop every cached handle.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

impl std::fmt::Debug for StoreCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCache")
            .field("protocol", &self.protocol)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use objfs_store::InMemoryBackend;
    use std::sync::atomic::AtomicUsize;

    /// Factory counting constructions, building a fresh in-memory store each time.
    #[derive(Default)]
    struct CountingFactory {
        built: AtomicUsize,
    }

    #[async_trait]
    impl BackendFactory for CountingFactory {
        async fn construct(
            &self,
            _url: &str,
            _options: &StoreOptions,
        ) -> objfs_store::Result<Arc<dyn ObjectBackend>> {
            self.built.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(Arc::new(InMemoryBackend::new()))
        }
    }

    fn cache(factory: Arc<CountingFactory>, capacity: usize) -> StoreCache {
        StoreCache::new("s3", factory, StoreOptions::default(), capacity).unwrap()
    }

    #[tokio::test]
    async fn test_same_bucket_hits_after_first_miss() {
        let factory = Arc::new(CountingFactory::default());
        let cache = cache(factory.clone(), 10);

        let first = cache.get_or_create("bucket").await.unwrap();
        for _ in 0..9 {
            let again = cache.get_or_create("bucket").await.unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }

        assert_eq!(cache.stats(), CacheStats { hits: 9, misses: 1 });
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capacity_bounds_live_handles() {
        let factory = Arc::new(CountingFactory::default());
        let cache = cache(factory.clone(), 2);

        for bucket in ["a", "b", "c", "d"] {
            cache.get_or_create(bucket).await.unwrap();
        }
        assert_eq!(cache.len().await, 2);
        assert!(!cache.contains("a").await);
        assert!(cache.contains("d").await);

        // "a" was evicted and is rebuilt.
        cache.get_or_create("a").await.unwrap();
        assert_eq!(cache.stats().misses, 5);
        assert_eq!(factory.built.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_hit_refreshes_recency() {
        let factory = Arc::new(CountingFactory::default());
        let cache = cache(factory, 2);

        cache.get_or_create("a").await.unwrap();
        cache.get_or_create("b").await.unwrap();
        cache.get_or_create("a").await.unwrap();
        cache.get_or_create("c").await.unwrap();

        assert!(cache.contains("a").await);
        assert!(!cache.contains("b").await);
    }

    #[tokio::test]
    async fn test_concurrent_misses_construct_once() {
        let factory = Arc::new(CountingFactory::default());
        let cache = Arc::new(cache(factory.clone(), 4));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_or_create("shared").await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(factory.built.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 7, misses: 1 });
    }

    /// Factory that parks on "slow" until released and refuses "broken".
    #[derive(Default)]
    struct GatedFactory {
        release: tokio::sync::Notify,
        built: AtomicUsize,
    }

    #[async_trait]
    impl BackendFactory for GatedFactory {
        async fn construct(
            &self,
            url: &str,
            _options: &StoreOptions,
        ) -> objfs_store::Result<Arc<dyn ObjectBackend>> {
            if url.ends_with("://broken") {
                return Err(objfs_store::StoreError::UnknownProtocol(url.to_string()));
            }
            if url.ends_with("://slow") {
                self.release.notified().await;
            }
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(InMemoryBackend::new()))
        }
    }

    #[tokio::test]
    async fn test_slow_construction_does_not_block_other_buckets() {
        let factory = Arc::new(GatedFactory::default());
        let cache = Arc::new(
            StoreCache::new("s3", factory.clone(), StoreOptions::default(), 4).unwrap(),
        );
        cache.get_or_create("fast").await.unwrap();

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_create("slow").await.unwrap() })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let hit = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            cache.get_or_create("fast"),
        )
        .await;
        assert!(hit.is_ok());

        factory.release.notify_one();
        slow.await.unwrap();
        assert_eq!(factory.built.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 2 });
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let factory = Arc::new(GatedFactory::default());
        let cache = StoreCache::new("s3", factory, StoreOptions::default(), 4).unwrap();

        assert!(cache.get_or_create("broken").await.is_err());
        assert!(cache.get_or_create("broken").await.is_err());
        assert!(!cache.contains("broken").await);
        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let factory = Arc::new(CountingFactory::default());
        let err = StoreCache::new("s3", factory, StoreOptions::default(), 0).unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
    }
}
