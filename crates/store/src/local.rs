//! Local filesystem backend
//!
//! Keys map onto files below a root directory. Directories are implicit:
//! they are created on write and only ever reported through listings.

use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::backend::{
    clamp_range, GetResult, ListResult, MultipartUpload, ObjectBackend, ObjectMeta, PutMode,
    PutResult,
};
use crate::error::{Result, StoreError};

/// Backend storing objects as files under `root`.
#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let key = key.trim_start_matches('/');
        if key.split('/').any(|segment| segment == "..") {
            return Err(StoreError::InvalidPath(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    async fn meta(&self, key: &str, path: &Path) -> Result<ObjectMeta> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| StoreError::from_io(e, key))?;
        if !metadata.is_file() {
            return Err(StoreError::not_found(key));
        }
        Ok(file_meta(key.trim_start_matches('/').to_string(), &metadata))
    }
}

fn file_meta(location: String, metadata: &std::fs::Metadata) -> ObjectMeta {
    let last_modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let e_tag = format!(
        "{:x}-{:x}",
        last_modified.timestamp_micros(),
        metadata.len()
    );
    ObjectMeta {
        location,
        size: metadata.len(),
        last_modified,
        e_tag: Some(e_tag),
        version: None,
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    Ok(())
}

#[async_trait]
impl ObjectBackend for LocalFsBackend {
    fn name(&self) -> &'static str {
        "LocalFileSystem"
    }

    async fn get(&self, key: &str) -> Result<GetResult> {
        let path = self.path_for(key)?;
        let meta = self.meta(key, &path).await?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| StoreError::from_io(e, key))?;
        let stream = ReaderStream::new(file).map_err(StoreError::Io);
        Ok(GetResult {
            meta,
            stream: Box::pin(stream),
        })
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        let path = self.path_for(key)?;
        let meta = self.meta(key, &path).await?;
        let Some(range) = clamp_range(&range, meta.size) else {
            return Ok(Bytes::new());
        };

        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| StoreError::from_io(e, key))?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = vec![0; (range.end - range.start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> Result<PutResult> {
        let path = self.path_for(key)?;
        ensure_parent(&path).await?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        match mode {
            PutMode::Overwrite => options.create(true).truncate(true),
            PutMode::Create => options.create_new(true),
        };
        let mut file = options
            .open(&path)
            .await
            .map_err(|e| StoreError::from_io(e, key))?;
        file.write_all(&data).await?;
        file.flush().await?;

        let meta = self.meta(key, &path).await?;
        Ok(PutResult {
            e_tag: meta.e_tag,
            version: None,
        })
    }

    async fn put_multipart(&self, key: &str) -> Result<Box<dyn MultipartUpload>> {
        let path = self.path_for(key)?;
        ensure_parent(&path).await?;

        // Parts land in a staging file that is renamed into place on completion.
        let staging = path.with_file_name(format!(
            ".{}.part",
            path.file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| StoreError::InvalidPath(key.to_string()))?
        ));
        let file = tokio::fs::File::create(&staging).await?;
        Ok(Box::new(LocalUpload {
            key: key.to_string(),
            target: path,
            staging,
            file: Some(file),
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| StoreError::from_io(e, key))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let source = self.path_for(from)?;
        let target = self.path_for(to)?;
        ensure_parent(&target).await?;
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| StoreError::from_io(e, from))?;
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta> {
        let path = self.path_for(key)?;
        self.meta(key, &path).await
    }

    async fn list_with_delimiter(&self, prefix: &str) -> Result<ListResult> {
        let prefix = prefix.trim_matches('/');
        let dir = self.path_for(prefix)?;

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // A missing directory is an empty listing, as with object stores.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ListResult::default())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => {
                return Ok(ListResult::default())
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut result = ListResult::default();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') && name.ends_with(".part") {
                continue;
            }
            let location = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                result.common_prefixes.push(location);
            } else if metadata.is_file() {
                result.objects.push(file_meta(location, &metadata));
            }
        }

        // Sort for consistent ordering
        result.objects.sort_by(|a, b| a.location.cmp(&b.location));
        result.common_prefixes.sort();

        tracing::debug!(
            "Listed {} files and {} directories in: {}",
            result.objects.len(),
            result.common_prefixes.len(),
            dir.display()
        );

        Ok(result)
    }
}

struct LocalUpload {
    key: String,
    target: PathBuf,
    staging: PathBuf,
    file: Option<tokio::fs::File>,
}

impl LocalUpload {
    fn file(&mut self) -> Result<&mut tokio::fs::File> {
        self.file.as_mut().ok_or_else(|| {
            StoreError::Io(std::io::Error::other("upload already finished"))
        })
    }
}

#[async_trait]
impl MultipartUpload for LocalUpload {
    async fn put_part(&mut self, data: Bytes) -> Result<()> {
        self.file()?.write_all(&data).await?;
        Ok(())
    }

    async fn complete(&mut self) -> Result<PutResult> {
        let mut file = self.file.take().ok_or_else(|| {
            StoreError::Io(std::io::Error::other("upload already finished"))
        })?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&self.staging, &self.target).await?;

        let metadata = tokio::fs::metadata(&self.target).await?;
        Ok(PutResult {
            e_tag: file_meta(self.key.clone(), &metadata).e_tag,
            version: None,
        })
    }

    async fn abort(&mut self) -> Result<()> {
        self.file = None;
        // A failed rename in `complete` may leave the staging file behind.
        match tokio::fs::remove_file(&self.staging).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFsBackend::new(temp_dir.path());

        store
            .put("dir/test.txt", Bytes::from_static(b"hello world"), PutMode::Overwrite)
            .await
            .unwrap();

        let data = store.get("dir/test.txt").await.unwrap().bytes().await.unwrap();
        assert_eq!(&data[..], b"hello world");

        let range = store.get_range("dir/test.txt", 6..100).await.unwrap();
        assert_eq!(&range[..], b"world");
    }

    #[tokio::test]
    async fn test_list_directory() {
        let temp_dir = TempDir::new().unwrap();

        // Create some test files
        std::fs::write(temp_dir.path().join("file1.csv"), "data1").unwrap();
        std::fs::write(temp_dir.path().join("file2.jsonl"), "data2").unwrap();

        // Create a subdirectory (reported as a prefix)
        std::fs::create_dir(temp_dir.path().join("subdir")).unwrap();
        std::fs::write(temp_dir.path().join("subdir/nested.csv"), "nested").unwrap();

        let store = LocalFsBackend::new(temp_dir.path());
        let results = store.list_with_delimiter("").await.unwrap();

        let names: Vec<_> = results.objects.iter().map(|o| o.location.as_str()).collect();
        assert_eq!(names, vec!["file1.csv", "file2.jsonl"]);
        assert_eq!(results.common_prefixes, vec!["subdir"]);

        let nested = store.list_with_delimiter("subdir/").await.unwrap();
        assert_eq!(nested.objects[0].location, "subdir/nested.csv");
        assert_eq!(nested.objects[0].size, 6);
    }

    #[tokio::test]
    async fn test_list_directory_not_found_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFsBackend::new(temp_dir.path());
        let results = store.list_with_delimiter("nonexistent").await.unwrap();
        assert!(results.objects.is_empty());
        assert!(results.common_prefixes.is_empty());
    }

    #[tokio::test]
    async fn test_head_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFsBackend::new(temp_dir.path());
        let err = store.head("missing.txt").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_mode_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFsBackend::new(temp_dir.path());
        store
            .put("a.txt", Bytes::from_static(b"1"), PutMode::Create)
            .await
            .unwrap();
        let err = store
            .put("a.txt", Bytes::from_static(b"2"), PutMode::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_multipart_rename_on_complete() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFsBackend::new(temp_dir.path());
        let mut upload = store.put_multipart("out/data.bin").await.unwrap();
        upload.put_part(Bytes::from_static(b"abc")).await.unwrap();
        assert!(store.head("out/data.bin").await.is_err());
        upload.put_part(Bytes::from_static(b"def")).await.unwrap();
        upload.complete().await.unwrap();

        let data = store.get("out/data.bin").await.unwrap().bytes().await.unwrap();
        assert_eq!(&data[..], b"abcdef");
        let listing = store.list_with_delimiter("out").await.unwrap();
        assert_eq!(listing.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_multipart_abort_removes_staging() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFsBackend::new(temp_dir.path());
        let mut upload = store.put_multipart("data.bin").await.unwrap();
        upload.put_part(Bytes::from_static(b"abc")).await.unwrap();
        assert!(temp_dir.path().join(".data.bin.part").exists());

        upload.abort().await.unwrap();
        assert!(!temp_dir.path().join(".data.bin.part").exists());
        assert!(!temp_dir.path().join("data.bin").exists());
        tokio_test::assert_ok!(upload.abort().await);
    }

    #[test]
    fn test_rejects_parent_segments() {
        let store = LocalFsBackend::new("/tmp");
        assert!(matches!(
            store.path_for("../etc/passwd"),
            Err(StoreError::InvalidPath(_))
        ));
    }
}
