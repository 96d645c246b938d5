//! objfs Library
//!
//! A filesystem interface over object stores. Object stores only offer
//! stateless, atomic calls (get, ranged get, put, delete, copy, head,
//! delimiter listing); this crate layers paths, directories, batched range
//! reads and cursor-based files on top of them.
//!
//! # Components
//!
//! - [`PathResolver`] - splits `protocol://bucket/key` or `bucket/key` paths
//! - [`StoreCache`] - bounded LRU of per-bucket backend handles
//! - [`RangePlan`] - coalesces scattered range reads into one call per file
//! - [`ObjectFile`] - read cursor or write buffer over one object
//! - [`ObjectFs`] - the filesystem operations (`ls`, `info`, `cat`, `cp`, ...)
//! - [`BlockingObjectFs`] - the same operations for synchronous callers
//!
//! Backends live in the `objfs-store` crate, re-exported as [`store`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use objfs::{FsConfig, ObjectFs};
//! use objfs::store::DefaultBackendFactory;
//!
//! let fs = ObjectFs::new(&FsConfig::new("s3"), Arc::new(DefaultBackendFactory::new()))?;
//! for record in fs.ls("my-bucket/data").await? {
//!     println!("{} {:?} {}", record.name, record.kind, record.size);
//! }
//! let parts = fs
//!     .cat_ranges(&["my-bucket/a.bin", "my-bucket/b.bin"], vec![0, 10], vec![4, 20])
//!     .await?;
//! ```

pub mod blocking;
pub mod cache;
pub mod config;
pub mod error;
pub mod file;
pub mod fs;
pub mod path;
pub mod ranges;
pub mod registry;

pub use objfs_store as store;

pub use blocking::{BlockingObjectFile, BlockingObjectFs};
pub use cache::{CacheStats, StoreCache, DEFAULT_MAX_CACHE_SIZE};
pub use config::{FsConfig, MissingPrefix};
pub use error::{FsError, Result};
pub use file::{ObjectFile, OpenMode, DEFAULT_WRITE_CHUNK_SIZE};
pub use fs::{EntryKind, ObjectFs, ObjectRecord};
pub use path::PathResolver;
pub use ranges::{Offsets, RangePlan};
pub use registry::{register, FilesystemRegistry, ProtocolTable};
