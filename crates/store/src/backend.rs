//! The object store capability interface
//!
//! This module defines the `ObjectBackend` trait every storage backend
//! implements, plus the records exchanged through it. The interface is
//! stateless: every call is atomic and addresses an object by key relative to
//! the backend's root (bucket, directory or base URL).

use std::fmt;
use std::ops::Range;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::TryStreamExt;

use crate::error::Result;

/// Metadata for a single stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Key of the object relative to the backend root.
    pub location: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modified timestamp.
    pub last_modified: DateTime<Utc>,
    /// Entity tag, when the backend reports one.
    pub e_tag: Option<String>,
    /// Object version, when the backend is versioned.
    pub version: Option<String>,
}

/// Result of a single-level listing.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Objects directly under the listed prefix.
    pub objects: Vec<ObjectMeta>,
    /// Child prefixes ("directories"), without trailing `/`.
    pub common_prefixes: Vec<String>,
}

/// Outcome of a successful put.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutResult {
    pub e_tag: Option<String>,
    pub version: Option<String>,
}

/// How a put treats an existing object at the same key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PutMode {
    /// Replace any existing object.
    #[default]
    Overwrite,
    /// Fail with `AlreadyExists` if the key is taken.
    Create,
}

/// A full-object read: metadata plus the body as a stream of chunks.
pub struct GetResult {
    pub meta: ObjectMeta,
    pub stream: BoxStream<'static, Result<Bytes>>,
}

impl GetResult {
    /// Collect the whole body into one buffer.
    pub async fn bytes(self) -> Result<Bytes> {
        let capacity = usize::try_from(self.meta.size).unwrap_or(0);
        let buf = self
            .stream
            .try_fold(BytesMut::with_capacity(capacity), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(buf.freeze())
    }
}

impl fmt::Debug for GetResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetResult")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Clamp a requested range to an object of `size` bytes.
///
/// Returns `None` when nothing of the range lies inside the object.
pub fn clamp_range(range: &Range<u64>, size: u64) -> Option<Range<u64>> {
    let end = range.end.min(size);
    if range.start >= end {
        None
    } else {
        Some(range.start..end)
    }
}

/// A streaming upload, finished atomically by [`MultipartUpload::complete`].
#[async_trait]
pub trait MultipartUpload: Send {
    /// Transmit one part. Parts are assembled in call order.
    async fn put_part(&mut self, data: Bytes) -> Result<()>;

    /// Make the uploaded parts visible as a single object.
    async fn complete(&mut self) -> Result<PutResult>;

    /// Discard any transmitted parts.
    async fn abort(&mut self) -> Result<()>;
}

/// Low-level object operations - implemented by each backend.
///
/// Handles are shared between concurrent callers behind an `Arc` and are
/// never mutated after construction.
#[async_trait]
pub trait ObjectBackend: Send + Sync + fmt::Debug {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Fetch a whole object.
    async fn get(&self, key: &str) -> Result<GetResult>;

    /// Fetch `[range.start, range.end)`, clamped to the object size.
    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes>;

    /// Fetch several ranges of one object in a single call.
    ///
    /// The returned buffers line up with `ranges`. The default issues every
    /// range concurrently.
    async fn get_ranges(&self, key: &str, ranges: &[Range<u64>]) -> Result<Vec<Bytes>> {
        futures::future::try_join_all(ranges.iter().map(|r| self.get_range(key, r.clone()))).await
    }

    /// Store `data` at `key`.
    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> Result<PutResult>;

    /// Start a streaming upload to `key`.
    ///
    /// Nothing is visible at `key` until the upload completes.
    async fn put_multipart(&self, key: &str) -> Result<Box<dyn MultipartUpload>>;

    /// Remove the object at `key`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Copy `from` to `to` inside this backend.
    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Object metadata, or `NotFound`.
    async fn head(&self, key: &str) -> Result<ObjectMeta>;

    /// List the immediate children of `prefix` (treated as a directory).
    ///
    /// An empty prefix lists the root.
    async fn list_with_delimiter(&self, prefix: &str) -> Result<ListResult>;
}

/// Normalize a listing prefix to the form `dir/`, or empty for the root.
pub fn directory_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}
