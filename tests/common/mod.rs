//! Shared helpers: in-memory buckets with observable call counts.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use objfs::store::{
    split_url, BackendFactory, GetResult, InMemoryBackend, ListResult, MultipartUpload,
    ObjectBackend, ObjectMeta, PutMode, PutResult, StoreError, StoreOptions,
};
use objfs::{FsConfig, ObjectFs};

/// Factory handing out one in-memory store per bucket.
///
/// Stores are created on first use and outlive cache eviction, so tests can
/// seed them up front and inspect their call counters afterwards.
#[derive(Default)]
pub struct BucketFactory {
    buckets: Mutex<HashMap<String, InMemoryBackend>>,
    constructed: AtomicUsize,
}

impl BucketFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bucket(&self, name: &str) -> InMemoryBackend {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(name.to_string()).or_default().clone()
    }

    /// Number of backend handles built so far.
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFactory for BucketFactory {
    async fn construct(
        &self,
        url: &str,
        _options: &StoreOptions,
    ) -> objfs::store::Result<Arc<dyn ObjectBackend>> {
        let (_, bucket) = split_url(url)?;
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.bucket(bucket)))
    }
}

/// A filesystem over `factory` with the given config.
pub fn fs_with(config: FsConfig, factory: &Arc<BucketFactory>) -> ObjectFs {
    let factory: Arc<dyn BackendFactory> = factory.clone();
    ObjectFs::new(&config, factory).unwrap()
}

/// An unbucketed `memory` filesystem plus its single store.
pub fn memory_fs() -> (ObjectFs, InMemoryBackend) {
    let factory = BucketFactory::new();
    let store = factory.bucket("");
    (fs_with(FsConfig::new("memory"), &factory), store)
}

/// The `a/file1`, `a/file2`, `b/file3` layout.
pub fn seed_layout(store: &InMemoryBackend) {
    store.seed("a/file1", "one");
    store.seed("a/file2", "two");
    store.seed("b/file3", "three");
}

/// Backend whose uploads fail the next `put_part` or `complete` on demand.
#[derive(Debug)]
pub struct FlakyUploads {
    inner: Arc<dyn ObjectBackend>,
    failing_parts: Arc<AtomicUsize>,
    failing_completes: Arc<AtomicUsize>,
    aborts: Arc<AtomicUsize>,
}

impl FlakyUploads {
    pub fn new(inner: Arc<dyn ObjectBackend>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_parts: Arc::default(),
            failing_completes: Arc::default(),
            aborts: Arc::default(),
        })
    }

    /// Make the next `put_part` on any upload fail.
    pub fn fail_next_part(&self) {
        self.failing_parts.fetch_add(1, Ordering::SeqCst);
    }

    /// Make the next `complete` on any upload fail.
    pub fn fail_next_complete(&self) {
        self.failing_completes.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of uploads aborted so far.
    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn disk_full() -> StoreError {
    StoreError::Io(std::io::Error::other("disk full"))
}

struct FlakyUpload {
    inner: Box<dyn MultipartUpload>,
    failing_parts: Arc<AtomicUsize>,
    failing_completes: Arc<AtomicUsize>,
    aborts: Arc<AtomicUsize>,
}

#[async_trait]
impl MultipartUpload for FlakyUpload {
    async fn put_part(&mut self, data: Bytes) -> objfs::store::Result<()> {
        if take_failure(&self.failing_parts) {
            return Err(disk_full());
        }
        self.inner.put_part(data).await
    }

    async fn complete(&mut self) -> objfs::store::Result<PutResult> {
        if take_failure(&self.failing_completes) {
            return Err(disk_full());
        }
        self.inner.complete().await
    }

    async fn abort(&mut self) -> objfs::store::Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort().await
    }
}

#[async_trait]
impl ObjectBackend for FlakyUploads {
    fn name(&self) -> &'static str {
        "Flaky"
    }

    async fn get(&self, key: &str) -> objfs::store::Result<GetResult> {
        self.inner.get(key).await
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> objfs::store::Result<Bytes> {
        self.inner.get_range(key, range).await
    }

    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> objfs::store::Result<PutResult> {
        self.inner.put(key, data, mode).await
    }

    async fn put_multipart(&self, key: &str) -> objfs::store::Result<Box<dyn MultipartUpload>> {
        Ok(Box::new(FlakyUpload {
            inner: self.inner.put_multipart(key).await?,
            failing_parts: Arc::clone(&self.failing_parts),
            failing_completes: Arc::clone(&self.failing_completes),
            aborts: Arc::clone(&self.aborts),
        }))
    }

    async fn delete(&self, key: &str) -> objfs::store::Result<()> {
        self.inner.delete(key).await
    }

    async fn copy(&self, from: &str, to: &str) -> objfs::store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn head(&self, key: &str) -> objfs::store::Result<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn list_with_delimiter(&self, prefix: &str) -> objfs::store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }
}
