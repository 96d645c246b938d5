//! Blocking wrappers for callers without an async runtime
//!
//! [`BlockingObjectFs`] drives an [`ObjectFs`] on a tokio runtime it owns or
//! shares, blocking the calling thread for each call. The semantics are the
//! same as the async facade. Do not call these from inside an async task:
//! blocking on a runtime from one of its own workers panics.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use objfs_store::{PutMode, PutResult};
use tokio::runtime::Runtime;

use crate::error::Result;
use crate::file::{ObjectFile, OpenMode};
use crate::fs::{ObjectFs, ObjectRecord};
use crate::ranges::Offsets;

/// Synchronous [`ObjectFs`].
#[derive(Debug, Clone)]
pub struct BlockingObjectFs {
    fs: Arc<ObjectFs>,
    runtime: Arc<Runtime>,
}

impl BlockingObjectFs {
    /// Wrap `fs` with a dedicated multi-threaded runtime.
    pub fn new(fs: ObjectFs) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        Ok(Self::with_runtime(Arc::new(fs), Arc::new(runtime)))
    }

    /// Wrap `fs` using an existing runtime.
    pub fn with_runtime(fs: Arc<ObjectFs>, runtime: Arc<Runtime>) -> Self {
        Self { fs, runtime }
    }

    /// The async facade behind this wrapper.
    pub fn inner(&self) -> &Arc<ObjectFs> {
        &self.fs
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn ls(&self, path: &str) -> Result<Vec<ObjectRecord>> {
        self.block_on(self.fs.ls(path))
    }

    pub fn ls_names(&self, path: &str) -> Result<Vec<String>> {
        self.block_on(self.fs.ls_names(path))
    }

    pub fn info(&self, path: &str) -> Result<ObjectRecord> {
        self.block_on(self.fs.info(path))
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        self.block_on(self.fs.exists(path))
    }

    pub fn is_dir(&self, path: &str) -> Result<bool> {
        self.block_on(self.fs.is_dir(path))
    }

    pub fn is_file(&self, path: &str) -> Result<bool> {
        self.block_on(self.fs.is_file(path))
    }

    pub fn find(&self, path: &str) -> Result<Vec<ObjectRecord>> {
        self.block_on(self.fs.find(path))
    }

    pub fn rm_file(&self, path: &str) -> Result<()> {
        self.block_on(self.fs.rm_file(path))
    }

    pub fn rm<P: AsRef<str>>(&self, paths: &[P], recursive: bool) -> Result<()> {
        self.block_on(self.fs.rm(paths, recursive))
    }

    pub fn cp_file(&self, src: &str, dst: &str) -> Result<()> {
        self.block_on(self.fs.cp_file(src, dst))
    }

    pub fn cp(&self, src: &str, dst: &str, recursive: bool) -> Result<()> {
        self.block_on(self.fs.cp(src, dst, recursive))
    }

    pub fn pipe(&self, path: &str, data: impl Into<Bytes>) -> Result<PutResult> {
        self.block_on(self.fs.pipe(path, data))
    }

    pub fn pipe_with_mode(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        mode: PutMode,
    ) -> Result<PutResult> {
        self.block_on(self.fs.pipe_with_mode(path, data, mode))
    }

    pub fn cat_file(&self, path: &str, start: Option<u64>, end: Option<u64>) -> Result<Bytes> {
        self.block_on(self.fs.cat_file(path, start, end))
    }

    pub fn cat<P: AsRef<str>>(
        &self,
        paths: &[P],
        recursive: bool,
    ) -> Result<BTreeMap<String, Bytes>> {
        self.block_on(self.fs.cat(paths, recursive))
    }

    pub fn cat_ranges<P: AsRef<str>>(
        &self,
        paths: &[P],
        starts: impl Into<Offsets>,
        ends: impl Into<Offsets>,
    ) -> Result<Vec<Bytes>> {
        self.block_on(self.fs.cat_ranges(paths, starts, ends))
    }

    pub fn put_file(&self, lpath: &Path, rpath: &str) -> Result<()> {
        self.block_on(self.fs.put_file(lpath, rpath))
    }

    pub fn get_file(&self, rpath: &str, lpath: &Path) -> Result<()> {
        self.block_on(self.fs.get_file(rpath, lpath))
    }

    pub fn open(&self, path: &str, mode: &str) -> Result<BlockingObjectFile> {
        let file = self.block_on(self.fs.open(path, mode))?;
        Ok(BlockingObjectFile {
            file,
            runtime: Arc::clone(&self.runtime),
        })
    }

    pub fn open_with(&self, path: &str, mode: OpenMode) -> Result<BlockingObjectFile> {
        let file = self.block_on(self.fs.open_with(path, mode))?;
        Ok(BlockingObjectFile {
            file,
            runtime: Arc::clone(&self.runtime),
        })
    }
}

/// Synchronous [`ObjectFile`], usable through `std::io` traits.
///
/// A writer that is dropped open is closed on drop, outside of any runtime.
#[derive(Debug)]
pub struct BlockingObjectFile {
    file: ObjectFile,
    runtime: Arc<Runtime>,
}

impl BlockingObjectFile {
    pub fn path(&self) -> &str {
        self.file.path()
    }

    pub fn mode(&self) -> OpenMode {
        self.file.mode()
    }

    pub fn tell(&self) -> u64 {
        self.file.tell()
    }

    pub fn size(&mut self) -> Result<u64> {
        self.runtime.block_on(self.file.size())
    }

    /// Read `length` bytes, or the rest of the object when `None`.
    pub fn read_bytes(&mut self, length: Option<u64>) -> Result<Bytes> {
        self.runtime.block_on(self.file.read(length))
    }

    pub fn readline(&mut self) -> Result<Bytes> {
        self.runtime.block_on(self.file.readline())
    }

    pub fn close(&mut self) -> Result<()> {
        self.runtime.block_on(self.file.close())
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_closed()
    }
}

impl io::Read for BlockingObjectFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self
            .runtime
            .block_on(self.file.read(Some(buf.len() as u64)))?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl io::Write for BlockingObjectFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.runtime.block_on(self.file.write(buf))?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.runtime.block_on(self.file.flush())?)
    }
}

impl io::Seek for BlockingObjectFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        Ok(self.runtime.block_on(self.file.seek(pos))?)
    }
}

impl Drop for BlockingObjectFile {
    fn drop(&mut self) {
        if self.file.is_closed() || self.file.mode() != OpenMode::Write {
            return;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            return;
        }
        if let Err(e) = self.runtime.block_on(self.file.close()) {
            tracing::error!("Failed to close '{}' on drop: {}", self.file.path(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objfs_store::DefaultBackendFactory;
    use std::io::{Read, Seek, SeekFrom, Write};

    fn memory_fs() -> BlockingObjectFs {
        let fs = ObjectFs::with_protocol("memory", Arc::new(DefaultBackendFactory::new())).unwrap();
        BlockingObjectFs::new(fs).unwrap()
    }

    #[test]
    fn test_blocking_round_trip_through_std_io() {
        let fs = memory_fs();

        let mut writer = fs.open("dir/data.txt", "wb").unwrap();
        writer.write_all(b"hello blocking world").unwrap();
        writer.close().unwrap();

        let mut reader = fs.open("dir/data.txt", "rb").unwrap();
        reader.seek(SeekFrom::Start(6)).unwrap();
        let mut word = [0u8; 8];
        reader.read_exact(&mut word).unwrap();
        assert_eq!(&word, b"blocking");

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b" world");
    }

    #[test]
    fn test_dropped_writer_is_closed() {
        let fs = memory_fs();
        {
            let mut writer = fs.open("auto", "wb").unwrap();
            writer.write_all(b"flushed on drop").unwrap();
        }
        assert_eq!(
            &fs.cat_file("auto", None, None).unwrap()[..],
            b"flushed on drop"
        );
    }

    #[test]
    fn test_blocking_listing() {
        let fs = memory_fs();
        fs.pipe("a/file1", "1").unwrap();
        fs.pipe("a/file2", "2").unwrap();
        fs.pipe("b/file3", "3").unwrap();

        assert_eq!(fs.ls_names("").unwrap(), vec!["a", "b"]);
        assert_eq!(fs.ls_names("a").unwrap(), vec!["a/file1", "a/file2"]);
        assert!(fs.is_dir("b").unwrap());
        assert!(!fs.exists("c").unwrap());
    }
}
