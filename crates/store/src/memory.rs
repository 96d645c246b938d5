//! In-memory backend
//!
//! Objects live in a sorted map behind a lock. Every operation bumps a
//! counter so tests can assert exactly which calls reached the backend.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::backend::{
    clamp_range, directory_prefix, GetResult, ListResult, MultipartUpload, ObjectBackend,
    ObjectMeta, PutMode, PutResult,
};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
    e_tag: String,
}

#[derive(Debug, Default)]
struct Counters {
    get: AtomicUsize,
    get_range: AtomicUsize,
    get_ranges: AtomicUsize,
    put: AtomicUsize,
    put_multipart: AtomicUsize,
    delete: AtomicUsize,
    copy: AtomicUsize,
    head: AtomicUsize,
    list: AtomicUsize,
}

/// Snapshot of how many times each operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub get_range: usize,
    pub get_ranges: usize,
    pub put: usize,
    pub put_multipart: usize,
    pub delete: usize,
    pub copy: usize,
    pub head: usize,
    pub list: usize,
}

impl CallCounts {
    /// Total number of backend calls.
    pub fn total(&self) -> usize {
        self.get
            + self.get_range
            + self.get_ranges
            + self.put
            + self.put_multipart
            + self.delete
            + self.copy
            + self.head
            + self.list
    }
}

#[derive(Debug, Default)]
struct Inner {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    next_tag: AtomicU64,
    counters: Counters,
}

impl Inner {
    fn insert(&self, key: &str, data: Bytes, mode: PutMode) -> Result<PutResult> {
        let mut objects = self
            .objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if mode == PutMode::Create && objects.contains_key(key) {
            return Err(StoreError::AlreadyExists {
                path: key.to_string(),
            });
        }
        let e_tag = format!("{:x}", self.next_tag.fetch_add(1, Ordering::Relaxed));
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
                e_tag: e_tag.clone(),
            },
        );
        Ok(PutResult {
            e_tag: Some(e_tag),
            version: None,
        })
    }

    fn lookup(&self, key: &str) -> Result<StoredObject> {
        let objects = self
            .objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }
}

fn meta_for(key: &str, object: &StoredObject) -> ObjectMeta {
    ObjectMeta {
        location: key.to_string(),
        size: object.data.len() as u64,
        last_modified: object.last_modified,
        e_tag: Some(object.e_tag.clone()),
        version: None,
    }
}

fn slice(data: &Bytes, range: &Range<u64>) -> Bytes {
    match clamp_range(range, data.len() as u64) {
        Some(r) => data.slice(r.start as usize..r.end as usize),
        None => Bytes::new(),
    }
}

/// Backend keeping every object in process memory.
///
/// Cloning yields another handle onto the same objects and counters.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current call counters.
    pub fn calls(&self) -> CallCounts {
        let c = &self.inner.counters;
        CallCounts {
            get: c.get.load(Ordering::SeqCst),
            get_range: c.get_range.load(Ordering::SeqCst),
            get_ranges: c.get_ranges.load(Ordering::SeqCst),
            put: c.put.load(Ordering::SeqCst),
            put_multipart: c.put_multipart.load(Ordering::SeqCst),
            delete: c.delete.load(Ordering::SeqCst),
            copy: c.copy.load(Ordering::SeqCst),
            head: c.head.load(Ordering::SeqCst),
            list: c.list.load(Ordering::SeqCst),
        }
    }

    /// Insert an object without counting it as a backend call.
    pub fn seed(&self, key: &str, data: impl Into<Bytes>) {
        // Overwrite never fails.
        let _ = self.inner.insert(key, data.into(), PutMode::Overwrite);
    }

    /// Keys currently stored, in order.
    pub fn keys(&self) -> Vec<String> {
        let objects = self
            .inner
            .objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        objects.keys().cloned().collect()
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "InMemory"
    }

    async fn get(&self, key: &str) -> Result<GetResult> {
        Self::bump(&self.inner.counters.get);
        let object = self.inner.lookup(key)?;
        let meta = meta_for(key, &object);
        let stream = futures::stream::once(async move { Ok(object.data) });
        Ok(GetResult {
            meta,
            stream: Box::pin(stream),
        })
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        Self::bump(&self.inner.counters.get_range);
        let object = self.inner.lookup(key)?;
        Ok(slice(&object.data, &range))
    }

    async fn get_ranges(&self, key: &str, ranges: &[Range<u64>]) -> Result<Vec<Bytes>> {
        Self::bump(&self.inner.counters.get_ranges);
        let object = self.inner.lookup(key)?;
        Ok(ranges.iter().map(|r| slice(&object.data, r)).collect())
    }

    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> Result<PutResult> {
        Self::bump(&self.inner.counters.put);
        self.inner.insert(key, data, mode)
    }

    async fn put_multipart(&self, key: &str) -> Result<Box<dyn MultipartUpload>> {
        Self::bump(&self.inner.counters.put_multipart);
        Ok(Box::new(InMemoryUpload {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            parts: BytesMut::new(),
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Self::bump(&self.inner.counters.delete);
        let mut objects = self
            .inner
            .objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        objects.remove(key);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        Self::bump(&self.inner.counters.copy);
        let object = self.inner.lookup(from)?;
        self.inner.insert(to, object.data, PutMode::Overwrite)?;
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta> {
        Self::bump(&self.inner.counters.head);
        let object = self.inner.lookup(key)?;
        Ok(meta_for(key, &object))
    }

    async fn list_with_delimiter(&self, prefix: &str) -> Result<ListResult> {
        Self::bump(&self.inner.counters.list);
        let prefix = directory_prefix(prefix);
        let objects = self
            .inner
            .objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut result = ListResult::default();
        for (key, object) in objects.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    let common = format!("{prefix}{dir}");
                    if result.common_prefixes.last() != Some(&common) {
                        result.common_prefixes.push(common);
                    }
                }
                None => result.objects.push(meta_for(key, object)),
            }
        }
        Ok(result)
    }
}

struct InMemoryUpload {
    inner: Arc<Inner>,
    key: String,
    parts: BytesMut,
}

#[async_trait]
impl MultipartUpload for InMemoryUpload {
    async fn put_part(&mut self, data: Bytes) -> Result<()> {
        self.parts.extend_from_slice(&data);
        Ok(())
    }

    async fn complete(&mut self) -> Result<PutResult> {
        let data = std::mem::take(&mut self.parts).freeze();
        self.inner.insert(&self.key, data, PutMode::Overwrite)
    }

    async fn abort(&mut self) -> Result<()> {
        self.parts.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryBackend {
        let store = InMemoryBackend::new();
        store.seed("a/file1", "one");
        store.seed("a/file2", "two");
        store.seed("a/nested/deep", "deep");
        store.seed("b/file3", "three");
        store
    }

    #[tokio::test]
    async fn test_list_root_yields_only_prefixes() {
        let store = store();
        let listing = store.list_with_delimiter("").await.unwrap();
        assert!(listing.objects.is_empty());
        assert_eq!(listing.common_prefixes, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_list_directory() {
        let store = store();
        let listing = store.list_with_delimiter("a").await.unwrap();
        let keys: Vec<_> = listing.objects.iter().map(|o| o.location.as_str()).collect();
        assert_eq!(keys, vec!["a/file1", "a/file2"]);
        assert_eq!(listing.common_prefixes, vec!["a/nested"]);
    }

    #[tokio::test]
    async fn test_get_range_clamps() {
        let store = store();
        let bytes = store.get_range("b/file3", 2..100).await.unwrap();
        assert_eq!(&bytes[..], b"ree");
        let empty = store.get_range("b/file3", 50..60).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_create_mode_rejects_existing() {
        let store = store();
        let err = store
            .put("a/file1", Bytes::from_static(b"x"), PutMode::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        tokio_test::assert_ok!(
            store
                .put("a/new", Bytes::from_static(b"x"), PutMode::Create)
                .await
        );
    }

    #[tokio::test]
    async fn test_multipart_invisible_until_complete() {
        let store = InMemoryBackend::new();
        let mut upload = store.put_multipart("out").await.unwrap();
        upload.put_part(Bytes::from_static(b"hello ")).await.unwrap();
        upload.put_part(Bytes::from_static(b"world")).await.unwrap();
        assert!(store.head("out").await.is_err());
        upload.complete().await.unwrap();
        let data = store.get("out").await.unwrap().bytes().await.unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_counters_track_calls() {
        let store = store();
        let _ = store.head("missing").await;
        let _ = store.get_ranges("a/file1", &[0..1, 1..2]).await.unwrap();
        let calls = store.calls();
        assert_eq!(calls.head, 1);
        assert_eq!(calls.get_ranges, 1);
        assert_eq!(calls.total(), 2);
    }
}
