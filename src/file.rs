//! Buffered file objects over a stateless backend
//!
//! An [`ObjectFile`] is either a read cursor or a write buffer. Reads are
//! independent ranged fetches from the current offset; there is no local
//! read-ahead. Writes accumulate in memory and are shipped as parts of a
//! streaming upload, which only becomes visible once the file is closed.

use std::io::SeekFrom;
use std::str::FromStr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use objfs_store::{MultipartUpload, ObjectBackend, PutMode};

use crate::error::{FsError, Result};

/// Default flush threshold for writers (5 MiB).
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Block size used when scanning for a line terminator.
const LINE_BLOCK_SIZE: u64 = 64 * 1024;

/// Open mode. Only binary read and binary write are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl FromStr for OpenMode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rb" => Ok(OpenMode::Read),
            "wb" => Ok(OpenMode::Write),
            other => Err(FsError::UnsupportedMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for OpenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenMode::Read => write!(f, "rb"),
            OpenMode::Write => write!(f, "wb"),
        }
    }
}

struct ReadCursor {
    loc: u64,
    size: Option<u64>,
}

struct WriteBuffer {
    buffer: BytesMut,
    upload: Option<Box<dyn MultipartUpload>>,
    written: u64,
    chunk_size: usize,
    aborted: bool,
}

enum Cursor {
    Read(ReadCursor),
    Write(WriteBuffer),
}

/// An open file on an object store.
pub struct ObjectFile {
    path: String,
    key: String,
    backend: Arc<dyn ObjectBackend>,
    cursor: Cursor,
    closed: bool,
}

impl ObjectFile {
    /// Open `key` on `backend` for reading. No backend call is made.
    pub fn reader(
        path: impl Into<String>,
        key: impl Into<String>,
        backend: Arc<dyn ObjectBackend>,
    ) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            backend,
            cursor: Cursor::Read(ReadCursor { loc: 0, size: None }),
            closed: false,
        }
    }

    /// Open `key` on `backend` for writing, flushing every `chunk_size` bytes.
    ///
    /// No backend call is made until the first flush or close.
    pub fn writer(
        path: impl Into<String>,
        key: impl Into<String>,
        backend: Arc<dyn ObjectBackend>,
        chunk_size: usize,
    ) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            backend,
            cursor: Cursor::Write(WriteBuffer {
                buffer: BytesMut::new(),
                upload: None,
                written: 0,
                chunk_size: chunk_size.max(1),
                aborted: false,
            }),
            closed: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        match self.cursor {
            Cursor::Read(_) => OpenMode::Read,
            Cursor::Write(_) => OpenMode::Write,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current offset: read position, or bytes written so far.
    pub fn tell(&self) -> u64 {
        match &self.cursor {
            Cursor::Read(r) => r.loc,
            Cursor::Write(w) => w.written,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(FsError::UseAfterClose(self.path.clone()));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        match &self.cursor {
            Cursor::Write(w) if w.aborted => Err(FsError::WriteAborted(self.path.clone())),
            _ => Ok(()),
        }
    }

    fn wrong_mode(&self, wanted: OpenMode) -> FsError {
        FsError::InvalidArgument(format!(
            "file '{}' is open in '{}' mode, not '{}'",
            self.path,
            self.mode(),
            wanted
        ))
    }

    /// Object size. For readers this is fetched once and remembered.
    pub async fn size(&mut self) -> Result<u64> {
        match &mut self.cursor {
            Cursor::Read(r) => {
                if let Some(size) = r.size {
                    return Ok(size);
                }
                let size = self.backend.head(&self.key).await?.size;
                r.size = Some(size);
                Ok(size)
            }
            Cursor::Write(w) => Ok(w.written),
        }
    }

    /// Read `length` bytes from the cursor, or everything left when `None`.
    ///
    /// With a length the cursor advances by exactly `length`, even when fewer
    /// bytes remain in the object.
    pub async fn read(&mut self, length: Option<u64>) -> Result<Bytes> {
        self.ensure_open()?;
        let loc = match &self.cursor {
            Cursor::Read(r) => r.loc,
            Cursor::Write(_) => return Err(self.wrong_mode(OpenMode::Read)),
        };

        let (range, next) = match length {
            Some(length) => {
                let end = loc.saturating_add(length);
                (loc..end, end)
            }
            None => {
                let size = self.size().await?;
                (loc..size, size)
            }
        };

        let data = if range.start >= range.end {
            Bytes::new()
        } else {
            self.backend.get_range(&self.key, range).await?
        };

        if let Cursor::Read(r) = &mut self.cursor {
            r.loc = next;
        }
        Ok(data)
    }

    /// Read from the cursor to the end of the object.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        self.read(None).await
    }

    /// Read through the next `\n` (included), or to the end of the object.
    pub async fn readline(&mut self) -> Result<Bytes> {
        let mut line = BytesMut::new();
        loop {
            let start = self.tell();
            let block = self.read(Some(LINE_BLOCK_SIZE)).await?;
            if let Some(pos) = block.iter().position(|b| *b == b'\n') {
                line.extend_from_slice(&block[..=pos]);
                self.set_loc(start + pos as u64 + 1);
                break;
            }
            line.extend_from_slice(&block);
            if (block.len() as u64) < LINE_BLOCK_SIZE {
                self.set_loc(start + block.len() as u64);
                break;
            }
        }
        Ok(line.freeze())
    }

    fn set_loc(&mut self, loc: u64) {
        if let Cursor::Read(r) = &mut self.cursor {
            r.loc = loc;
        }
    }

    /// Move the read cursor. Seeking past the end is allowed; reads there
    /// return nothing.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        let loc = match &self.cursor {
            Cursor::Read(r) => r.loc,
            Cursor::Write(_) => return Err(self.wrong_mode(OpenMode::Read)),
        };
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => loc.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size().await?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            FsError::InvalidArgument(format!("seek before start of file: {pos:?}"))
        })?;
        self.set_loc(target);
        Ok(target)
    }

    /// Append `data` to the write buffer, flushing once it reaches the chunk size.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_writable()?;
        let should_flush = match &mut self.cursor {
            Cursor::Write(w) => {
                w.buffer.extend_from_slice(data);
                w.written += data.len() as u64;
                w.buffer.len() >= w.chunk_size
            }
            Cursor::Read(_) => return Err(self.wrong_mode(OpenMode::Write)),
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(data.len())
    }

    /// Ship buffered bytes to the backend as one upload part.
    ///
    /// A no-op for readers and for an empty buffer. If the part cannot be
    /// transmitted the upload is aborted and every later write, flush or
    /// close fails with [`FsError::WriteAborted`].
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let Cursor::Write(w) = &mut self.cursor else {
            return Ok(());
        };
        if w.buffer.is_empty() {
            return Ok(());
        }
        if w.upload.is_none() {
            w.upload = Some(self.backend.put_multipart(&self.key).await?);
        }
        let part = w.buffer.split().freeze();
        tracing::debug!("Flushing {} bytes to '{}'", part.len(), self.path);
        let sent = match w.upload.as_mut() {
            Some(upload) => upload.put_part(part).await,
            None => Ok(()),
        };
        if let Err(err) = sent {
            return Err(self.abort_upload(err.into()).await);
        }
        Ok(())
    }

    /// Discard the upload after a failed part or completion.
    async fn abort_upload(&mut self, err: FsError) -> FsError {
        if let Cursor::Write(w) = &mut self.cursor {
            w.aborted = true;
            w.buffer.clear();
            if let Some(mut upload) = w.upload.take() {
                if let Err(abort_err) = upload.abort().await {
                    tracing::warn!("Failed to abort upload of '{}': {}", self.path, abort_err);
                }
            }
        }
        tracing::debug!("Aborted write to '{}': {}", self.path, err);
        err
    }

    /// Finish the file. Writers make every written byte visible before this
    /// returns. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.mode() == OpenMode::Write {
            self.ensure_writable()?;
            let started = matches!(&self.cursor, Cursor::Write(w) if w.upload.is_some());
            if started {
                self.flush().await?;
                let completed = match &mut self.cursor {
                    Cursor::Write(w) => match w.upload.as_mut() {
                        Some(upload) => upload.complete().await.map(|_| ()),
                        None => Ok(()),
                    },
                    Cursor::Read(_) => Ok(()),
                };
                if let Err(err) = completed {
                    return Err(self.abort_upload(err.into()).await);
                }
                if let Cursor::Write(w) = &mut self.cursor {
                    w.upload = None;
                }
            } else if let Cursor::Write(w) = &mut self.cursor {
                // Nothing flushed yet: one plain put covers the whole file.
                let data = Bytes::copy_from_slice(&w.buffer);
                self.backend.put(&self.key, data, PutMode::Overwrite).await?;
                w.buffer.clear();
            }
            tracing::debug!("Closed '{}' after writing {} bytes", self.path, self.tell());
        }
        self.closed = true;
        Ok(())
    }
}

impl std::fmt::Debug for ObjectFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectFile")
            .field("path", &self.path)
            .field("mode", &self.mode())
            .field("offset", &self.tell())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for ObjectFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Cursor::Write(w) = &mut self.cursor else {
            return;
        };
        if w.aborted {
            return;
        }
        tracing::warn!(
            "File '{}' dropped without close; written data was discarded",
            self.path
        );

        // Staged parts are released in the background when a runtime is around.
        let Some(mut upload) = w.upload.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let path = self.path.clone();
                handle.spawn(async move {
                    if let Err(err) = upload.abort().await {
                        tracing::warn!("Failed to abort upload of '{}': {}", path, err);
                    }
                });
            }
            Err(_) => tracing::warn!(
                "No runtime to abort the upload of '{}'; staged parts were left behind",
                self.path
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objfs_store::InMemoryBackend;

    fn backend_with(key: &str, data: &'static [u8]) -> InMemoryBackend {
        let store = InMemoryBackend::new();
        store.seed(key, data);
        store
    }

    #[test]
    fn test_open_mode_parsing() {
        assert_eq!("rb".parse::<OpenMode>().unwrap(), OpenMode::Read);
        assert_eq!("wb".parse::<OpenMode>().unwrap(), OpenMode::Write);
        for mode in ["r", "w", "ab", "rb+", ""] {
            assert!(matches!(
                mode.parse::<OpenMode>(),
                Err(FsError::UnsupportedMode(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_read_advances_by_requested_length() {
        let store = backend_with("f", b"0123456789");
        let mut file = ObjectFile::reader("f", "f", Arc::new(store.clone()));

        assert_eq!(&file.read(Some(4)).await.unwrap()[..], b"0123");
        assert_eq!(file.tell(), 4);
        assert_eq!(&file.read(Some(100)).await.unwrap()[..], b"456789");
        assert_eq!(file.tell(), 104);
        assert!(file.read(Some(1)).await.unwrap().is_empty());
        assert_eq!(store.calls().get_range, 3);
    }

    #[tokio::test]
    async fn test_read_to_end_moves_cursor_to_size() {
        let store = backend_with("f", b"0123456789");
        let mut file = ObjectFile::reader("f", "f", Arc::new(store.clone()));

        file.seek(SeekFrom::Start(3)).await.unwrap();
        assert_eq!(&file.read_to_end().await.unwrap()[..], b"3456789");
        assert_eq!(file.tell(), 10);
        assert!(file.read(None).await.unwrap().is_empty());
        assert_eq!(store.calls().head, 1);
    }

    #[tokio::test]
    async fn test_seek_variants() {
        let store = backend_with("f", b"0123456789");
        let mut file = ObjectFile::reader("f", "f", Arc::new(store));

        assert_eq!(file.seek(SeekFrom::End(-2)).await.unwrap(), 8);
        assert_eq!(file.seek(SeekFrom::Current(-3)).await.unwrap(), 5);
        assert!(matches!(
            file.seek(SeekFrom::Current(-10)).await,
            Err(FsError::InvalidArgument(_))
        ));
        assert_eq!(&file.read(Some(2)).await.unwrap()[..], b"56");
    }

    #[tokio::test]
    async fn test_readline() {
        let store = backend_with("f", b"alpha\nbeta\ngamma");
        let mut file = ObjectFile::reader("f", "f", Arc::new(store));

        assert_eq!(&file.readline().await.unwrap()[..], b"alpha\n");
        assert_eq!(&file.readline().await.unwrap()[..], b"beta\n");
        assert_eq!(&file.readline().await.unwrap()[..], b"gamma");
        assert_eq!(file.tell(), 16);
        assert!(file.readline().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_small_write_is_single_put() {
        let store = InMemoryBackend::new();
        let mut file = ObjectFile::writer("out", "out", Arc::new(store.clone()), 1024);

        file.write(b"hello ").await.unwrap();
        file.write(b"world").await.unwrap();
        assert!(store.keys().is_empty());
        file.close().await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.put, 1);
        assert_eq!(calls.put_multipart, 0);
        let data = store.get("out").await.unwrap().bytes().await.unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_large_write_flushes_parts() {
        let store = InMemoryBackend::new();
        let mut file = ObjectFile::writer("out", "out", Arc::new(store.clone()), 4);

        file.write(b"abcdef").await.unwrap();
        file.write(b"gh").await.unwrap();
        file.write(b"ij").await.unwrap();
        assert!(store.keys().is_empty());
        assert_eq!(file.tell(), 10);
        file.close().await.unwrap();

        assert_eq!(store.calls().put_multipart, 1);
        let data = store.get("out").await.unwrap().bytes().await.unwrap();
        assert_eq!(&data[..], b"abcdefghij");
    }

    #[tokio::test]
    async fn test_use_after_close() {
        let store = InMemoryBackend::new();
        let mut file = ObjectFile::writer("out", "out", Arc::new(store.clone()), 16);
        file.write(b"x").await.unwrap();
        file.close().await.unwrap();
        tokio_test::assert_ok!(file.close().await);
        assert_eq!(store.calls().put, 1);

        assert!(matches!(file.write(b"y").await, Err(FsError::UseAfterClose(_))));
        assert!(matches!(file.flush().await, Err(FsError::UseAfterClose(_))));

        let mut reader = ObjectFile::reader("out", "out", Arc::new(store));
        reader.close().await.unwrap();
        assert!(matches!(reader.read(Some(1)).await, Err(FsError::UseAfterClose(_))));
    }

    #[tokio::test]
    async fn test_mode_is_enforced() {
        let store = backend_with("f", b"data");
        let mut reader = ObjectFile::reader("f", "f", Arc::new(store.clone()));
        assert!(matches!(
            reader.write(b"x").await,
            Err(FsError::InvalidArgument(_))
        ));

        let mut writer = ObjectFile::writer("g", "g", Arc::new(store), 16);
        assert!(matches!(
            writer.read(Some(1)).await,
            Err(FsError::InvalidArgument(_))
        ));
        writer.close().await.unwrap();
    }
}
