//! Filesystem facade over per-bucket object stores
//!
//! [`ObjectFs`] turns filesystem-style calls into backend operations:
//!
//! 1. The path is split into bucket and key by the [`PathResolver`]
//! 2. The [`StoreCache`] hands out the backend for that bucket
//! 3. One or more backend calls run, fanned out and joined for batch calls
//! 4. Results are normalized into [`ObjectRecord`]s
//!
//! Directories do not exist in the stores; they are inferred from the common
//! prefixes a delimiter listing reports.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use objfs_store::{BackendFactory, ObjectBackend, ObjectMeta, PutMode, PutResult, StoreError};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::cache::StoreCache;
use crate::config::{FsConfig, MissingPrefix};
use crate::error::{FsError, Result};
use crate::file::{ObjectFile, OpenMode};
use crate::path::{join_name, PathResolver};
use crate::ranges::{Offsets, RangePlan};

/// Whether a record is a stored object or an inferred directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// A listing or `info` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    /// `bucket/key` (bucket omitted when the protocol has none), no trailing `/`.
    pub name: String,
    /// Size in bytes; always 0 for directories.
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ObjectRecord {
    fn from_meta(bucket: &str, meta: ObjectMeta) -> Self {
        let kind = if meta.location.ends_with('/') {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Self {
            name: join_name(bucket, meta.location.trim_end_matches('/')),
            size: meta.size,
            kind,
            e_tag: meta.e_tag,
            last_modified: Some(meta.last_modified),
            version: meta.version,
        }
    }

    fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            kind: EntryKind::Directory,
            e_tag: None,
            last_modified: None,
            version: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// A resolved path: its bucket, its key and the backend serving the bucket.
struct Location {
    bucket: String,
    key: String,
    backend: Arc<dyn ObjectBackend>,
}

/// Filesystem interface for one protocol.
///
/// Every method takes `&self`; share an instance behind an `Arc` to use it
/// from several tasks.
#[derive(Debug)]
pub struct ObjectFs {
    resolver: PathResolver,
    cache: StoreCache,
    missing_prefix: MissingPrefix,
    write_chunk_size: usize,
}

impl ObjectFs {
    /// Build a filesystem from `config`. No backend is constructed yet.
    pub fn new(config: &FsConfig, factory: Arc<dyn BackendFactory>) -> Result<Self> {
        config.validate()?;
        let resolver = PathResolver::new(config.protocol.clone())?;
        let cache = StoreCache::new(
            config.protocol.clone(),
            factory,
            config.store_options()?,
            config.max_cache_size,
        )?;
        Ok(Self {
            resolver,
            cache,
            missing_prefix: config.missing_prefix,
            write_chunk_size: config.write_chunk_size,
        })
    }

    /// Build a filesystem for `protocol` with default settings.
    pub fn with_protocol(
        protocol: impl Into<String>,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self> {
        Self::new(&FsConfig::new(protocol), factory)
    }

    pub fn protocol(&self) -> &str {
        self.resolver.protocol()
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &StoreCache {
        &self.cache
    }

    async fn locate(&self, path: &str) -> Result<Location> {
        let (bucket, key) = self.resolver.split(path)?;
        let backend = self.cache.get_or_create(&bucket).await?;
        Ok(Location {
            bucket,
            key,
            backend,
        })
    }

    /// One delimiter listing, without the missing-prefix policy.
    async fn list_records(&self, path: &str) -> Result<Vec<ObjectRecord>> {
        let loc = self.locate(path).await?;
        let listing = loc.backend.list_with_delimiter(&loc.key).await?;
        debug!(
            "Listed '{}': {} objects, {} prefixes",
            path,
            listing.objects.len(),
            listing.common_prefixes.len()
        );

        let mut records =
            Vec::with_capacity(listing.objects.len() + listing.common_prefixes.len());
        records.extend(
            listing
                .objects
                .into_iter()
                .map(|meta| ObjectRecord::from_meta(&loc.bucket, meta)),
        );
        records.extend(listing.common_prefixes.iter().map(|prefix| {
            ObjectRecord::directory(join_name(&loc.bucket, prefix.trim_end_matches('/')))
        }));
        Ok(records)
    }

    /// Immediate children of `path`: objects as files, common prefixes as
    /// directories. An empty result follows the configured missing-prefix
    /// policy.
    pub async fn ls(&self, path: &str) -> Result<Vec<ObjectRecord>> {
        let records = self.list_records(path).await?;
        if records.is_empty() && self.missing_prefix == MissingPrefix::Error {
            return Err(FsError::NotFound(path.to_string()));
        }
        Ok(records)
    }

    /// Sorted names of the immediate children of `path`.
    pub async fn ls_names(&self, path: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.ls(path).await?.into_iter().map(|r| r.name).collect();
        names.sort();
        Ok(names)
    }

    /// Listing that treats an absent prefix as empty, whatever the policy.
    async fn ls_or_empty(&self, path: &str) -> Result<Vec<ObjectRecord>> {
        match self.list_records(path).await {
            Ok(records) => Ok(records),
            Err(FsError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Metadata for `path`.
    ///
    /// Objects are answered by `head`. Otherwise the parent listing is
    /// searched for the name, then the path itself is listed: any children
    /// make it a directory.
    pub async fn info(&self, path: &str) -> Result<ObjectRecord> {
        let loc = self.locate(path).await?;
        let name = join_name(&loc.bucket, loc.key.trim_end_matches('/'));
        if loc.key.trim_matches('/').is_empty() {
            return Ok(ObjectRecord::directory(name));
        }

        match loc.backend.head(&loc.key).await {
            Ok(meta) => return Ok(ObjectRecord::from_meta(&loc.bucket, meta)),
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        debug!("No object at '{}', falling back to listings", path);

        let parent = self.resolver.parent(path)?;
        let siblings = self.ls_or_empty(&parent).await?;
        if let Some(record) = siblings.into_iter().find(|r| r.name == name) {
            return Ok(record);
        }

        let children = self.ls_or_empty(path).await?;
        let mut matching: Vec<ObjectRecord> =
            children.iter().filter(|r| r.name == name).cloned().collect();
        if matching.len() == 1 {
            return Ok(matching.remove(0));
        }
        if !matching.is_empty() || !children.is_empty() {
            return Ok(ObjectRecord::directory(name));
        }
        Err(FsError::NotFound(path.to_string()))
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.info(path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn is_dir(&self, path: &str) -> Result<bool> {
        match self.info(path).await {
            Ok(record) => Ok(record.is_dir()),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn is_file(&self, path: &str) -> Result<bool> {
        match self.info(path).await {
            Ok(record) => Ok(record.is_file()),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every object below `path`, sorted by name.
    ///
    /// Walks delimiter listings level by level, listing each level's
    /// directories concurrently. A path naming a single object yields that
    /// object.
    pub async fn find(&self, path: &str) -> Result<Vec<ObjectRecord>> {
        let root = self.resolver.normalize(path)?;
        let mut files = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![root.clone()];

        while !pending.is_empty() {
            let listings =
                futures::future::try_join_all(pending.iter().map(|dir| self.ls_or_empty(dir)))
                    .await?;
            visited.extend(pending.drain(..));
            for record in listings.into_iter().flatten() {
                match record.kind {
                    EntryKind::File => files.push(record),
                    EntryKind::Directory if !visited.contains(&record.name) => {
                        pending.push(record.name)
                    }
                    EntryKind::Directory => {}
                }
            }
        }

        if files.is_empty() {
            let loc = self.locate(path).await?;
            if !loc.key.is_empty() {
                match loc.backend.head(&loc.key).await {
                    Ok(meta) => files.push(ObjectRecord::from_meta(&loc.bucket, meta)),
                    Err(StoreError::NotFound { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Found {} files below '{}'", files.len(), root);
        Ok(files)
    }

    /// Delete one object.
    pub async fn rm_file(&self, path: &str) -> Result<()> {
        let loc = self.locate(path).await?;
        loc.backend.delete(&loc.key).await?;
        Ok(())
    }

    /// Delete `paths`, and with `recursive` every object below them.
    ///
    /// Deletes run concurrently; the call fails if any of them fails.
    pub async fn rm<P: AsRef<str>>(&self, paths: &[P], recursive: bool) -> Result<()> {
        let mut targets = BTreeSet::new();
        for path in paths {
            let path = path.as_ref();
            if recursive {
                let found = self.find(path).await?;
                if !found.is_empty() {
                    targets.extend(found.into_iter().map(|r| r.name));
                    continue;
                }
            }
            targets.insert(self.resolver.normalize(path)?);
        }

        debug!("Deleting {} objects", targets.len());
        futures::future::try_join_all(targets.iter().map(|target| self.rm_file(target))).await?;
        Ok(())
    }

    /// Split both sides of a copy, refusing to cross buckets.
    fn split_copy(&self, src: &str, dst: &str) -> Result<(String, String, String)> {
        let (src_bucket, src_key) = self.resolver.split(src)?;
        let (dst_bucket, dst_key) = self.resolver.split(dst)?;
        if src_bucket != dst_bucket {
            return Err(FsError::BucketMismatch {
                src: src.to_string(),
                src_bucket,
                dst: dst.to_string(),
                dst_bucket,
            });
        }
        Ok((src_bucket, src_key, dst_key))
    }

    /// Copy one object within its bucket.
    pub async fn cp_file(&self, src: &str, dst: &str) -> Result<()> {
        let (bucket, src_key, dst_key) = self.split_copy(src, dst)?;
        let backend = self.cache.get_or_create(&bucket).await?;
        backend.copy(&src_key, &dst_key).await?;
        Ok(())
    }

    /// Copy `src` to `dst`; with `recursive`, every object below `src` lands
    /// at the same relative position below `dst`.
    pub async fn cp(&self, src: &str, dst: &str, recursive: bool) -> Result<()> {
        self.split_copy(src, dst)?;
        if !recursive {
            return self.cp_file(src, dst).await;
        }

        let src_root = self.resolver.normalize(src)?;
        let dst_root = self.resolver.normalize(dst)?;
        let files = self.find(src).await?;
        if files.is_empty() {
            return Err(FsError::NotFound(src.to_string()));
        }

        let pairs: Vec<(String, String)> = files
            .into_iter()
            .map(|record| {
                let relative = record
                    .name
                    .strip_prefix(src_root.as_str())
                    .unwrap_or(&record.name)
                    .trim_start_matches('/');
                let target = if relative.is_empty() {
                    dst_root.clone()
                } else {
                    format!("{dst_root}/{relative}")
                };
                (record.name, target)
            })
            .collect();

        debug!("Copying {} objects from '{}' to '{}'", pairs.len(), src, dst);
        futures::future::try_join_all(pairs.iter().map(|(from, to)| self.cp_file(from, to)))
            .await?;
        Ok(())
    }

    /// Store `data` at `path`, replacing any existing object.
    pub async fn pipe(&self, path: &str, data: impl Into<Bytes>) -> Result<PutResult> {
        self.pipe_with_mode(path, data, PutMode::Overwrite).await
    }

    /// Store `data` at `path`. `PutMode::Create` fails with `AlreadyExists`
    /// when the object is present.
    pub async fn pipe_with_mode(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        mode: PutMode,
    ) -> Result<PutResult> {
        let loc = self.locate(path).await?;
        Ok(loc.backend.put(&loc.key, data.into(), mode).await?)
    }

    /// Read one object, whole or `[start, end)`.
    ///
    /// A missing `start` reads from 0, a missing `end` reads to the end of
    /// the object.
    pub async fn cat_file(
        &self,
        path: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<Bytes> {
        let loc = self.locate(path).await?;
        match (start, end) {
            (None, None) => Ok(loc.backend.get(&loc.key).await?.bytes().await?),
            (start, Some(end)) => Ok(loc
                .backend
                .get_range(&loc.key, start.unwrap_or(0)..end)
                .await?),
            (Some(start), None) => {
                let size = loc.backend.head(&loc.key).await?.size;
                Ok(loc.backend.get_range(&loc.key, start..size).await?)
            }
        }
    }

    /// Contents of every file that `paths` expand to, keyed by name.
    ///
    /// Without `recursive` each path must name an object; with it, every
    /// object below each path is read. Directories are skipped. Fails with
    /// `NotFound` when nothing is left to read.
    pub async fn cat<P: AsRef<str>>(
        &self,
        paths: &[P],
        recursive: bool,
    ) -> Result<BTreeMap<String, Bytes>> {
        let mut files = BTreeSet::new();
        for path in paths {
            let path = path.as_ref();
            if recursive {
                files.extend(self.find(path).await?.into_iter().map(|r| r.name));
            } else {
                match self.info(path).await {
                    Ok(record) if record.is_file() => {
                        files.insert(record.name);
                    }
                    Ok(_) | Err(FsError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        if files.is_empty() {
            let shown: Vec<&str> = paths.iter().map(|p| p.as_ref()).collect();
            return Err(FsError::NotFound(shown.join(", ")));
        }

        let contents = futures::future::try_join_all(
            files.iter().map(|name| self.cat_file(name, None, None)),
        )
        .await?;
        Ok(files.into_iter().zip(contents).collect())
    }

    /// Read many byte ranges across many files.
    ///
    /// `starts` and `ends` are either one value for every path or one value
    /// per path. Each distinct path costs one multi-range backend call; the
    /// calls run concurrently and the output follows the input order.
    pub async fn cat_ranges<P: AsRef<str>>(
        &self,
        paths: &[P],
        starts: impl Into<Offsets>,
        ends: impl Into<Offsets>,
    ) -> Result<Vec<Bytes>> {
        let plan = RangePlan::new(paths, starts, ends)?;

        // Resolve every path before touching any backend.
        let mut splits = Vec::with_capacity(plan.groups().len());
        for group in plan.groups() {
            let (bucket, key) = self.resolver.split(&group.path)?;
            splits.push((group.path.clone(), bucket, key));
        }

        let mut backends: HashMap<String, Arc<dyn ObjectBackend>> = HashMap::new();
        let mut targets: HashMap<String, (Arc<dyn ObjectBackend>, String)> = HashMap::new();
        for (path, bucket, key) in splits {
            let backend = match backends.get(&bucket) {
                Some(backend) => Arc::clone(backend),
                None => {
                    let backend = self.cache.get_or_create(&bucket).await?;
                    backends.insert(bucket, Arc::clone(&backend));
                    backend
                }
            };
            targets.insert(path, (backend, key));
        }

        plan.execute(|group| {
            let target = targets.get(&group.path).cloned();
            async move {
                let (backend, key) =
                    target.ok_or_else(|| FsError::NotFound(group.path.clone()))?;
                Ok::<_, FsError>(backend.get_ranges(&key, &group.ranges).await?)
            }
        })
        .await
    }

    /// Upload a local file to `rpath`, in parts of the write chunk size.
    pub async fn put_file(&self, lpath: &Path, rpath: &str) -> Result<()> {
        let mut local = tokio::fs::File::open(lpath).await?;
        let mut remote = self.open_with(rpath, OpenMode::Write).await?;
        let mut buf = vec![0u8; self.write_chunk_size.min(1024 * 1024)];
        loop {
            let n = local.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            remote.write(&buf[..n]).await?;
        }
        remote.close().await?;
        debug!("Uploaded '{}' to '{}'", lpath.display(), rpath);
        Ok(())
    }

    /// Download `rpath` into a local file, chunk by chunk.
    pub async fn get_file(&self, rpath: &str, lpath: &Path) -> Result<()> {
        let loc = self.locate(rpath).await?;
        let mut stream = loc.backend.get(&loc.key).await?.stream;
        let mut local = tokio::fs::File::create(lpath).await?;
        while let Some(chunk) = stream.try_next().await? {
            local.write_all(&chunk).await?;
        }
        local.flush().await?;
        debug!("Downloaded '{}' to '{}'", rpath, lpath.display());
        Ok(())
    }

    /// Open `path` as a buffered file. `mode` is `"rb"` or `"wb"`.
    pub async fn open(&self, path: &str, mode: &str) -> Result<ObjectFile> {
        let mode: OpenMode = mode.parse()?;
        self.open_with(path, mode).await
    }

    pub async fn open_with(&self, path: &str, mode: OpenMode) -> Result<ObjectFile> {
        let loc = self.locate(path).await?;
        let name = join_name(&loc.bucket, &loc.key);
        Ok(match mode {
            OpenMode::Read => ObjectFile::reader(name, loc.key, loc.backend),
            OpenMode::Write => {
                ObjectFile::writer(name, loc.key, loc.backend, self.write_chunk_size)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta(location: &str, size: u64) -> ObjectMeta {
        ObjectMeta {
            location: location.to_string(),
            size,
            last_modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            e_tag: Some("abc".to_string()),
            version: None,
        }
    }

    #[test]
    fn test_record_from_meta() {
        let record = ObjectRecord::from_meta("bucket", meta("dir/file.csv", 12));
        assert_eq!(record.name, "bucket/dir/file.csv");
        assert_eq!(record.size, 12);
        assert!(record.is_file());

        let record = ObjectRecord::from_meta("", meta("dir/", 0));
        assert_eq!(record.name, "dir");
        assert!(record.is_dir());
    }

    #[test]
    fn test_record_serializes_like_a_listing_entry() {
        let json = serde_json::to_value(ObjectRecord::directory("a")).unwrap();
        assert_eq!(json, serde_json::json!({"name": "a", "size": 0, "type": "directory"}));

        let json = serde_json::to_value(ObjectRecord::from_meta("", meta("f", 3))).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["e_tag"], "abc");
    }
}
