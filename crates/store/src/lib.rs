//! Object store backends for reading and writing through one interface
//!
//! This crate defines [`ObjectBackend`], the narrow, stateless capability
//! surface (get, ranged get, put, delete, copy, head, delimiter listing) that
//! the filesystem layer is built on, together with the backends that
//! implement it.
//!
//! # Backends
//!
//! - **InMemory**: Objects held in process memory; records per-call counters
//! - **Local**: Files below a root directory on the local filesystem
//! - **S3**: Objects in one AWS S3 bucket
//! - **HTTP/HTTPS**: Read-only access to URLs (no listing)
//!
//! Durability, retries and consistency are whatever the backend provides;
//! nothing here adds to them.
//!
//! # Example
//!
//! ```ignore
//! use objfs_store::{BackendFactory, DefaultBackendFactory, StoreOptions};
//!
//! let factory = DefaultBackendFactory::new();
//! let backend = factory.construct("s3://my-bucket", &StoreOptions::default()).await?;
//! let listing = backend.list_with_delimiter("data/").await?;
//! for object in listing.objects {
//!     println!("{} ({} bytes)", object.location, object.size);
//! }
//! ```

mod backend;
mod error;
mod factory;
mod http;
mod local;
mod memory;
mod options;
mod s3;

pub use backend::{
    clamp_range, directory_prefix, GetResult, ListResult, MultipartUpload, ObjectBackend,
    ObjectMeta, PutMode, PutResult,
};
pub use error::{Result, StoreError};
pub use factory::{split_url, BackendFactory, DefaultBackendFactory};
pub use http::HttpBackend;
pub use local::LocalFsBackend;
pub use memory::{CallCounts, InMemoryBackend};
pub use options::{BackoffConfig, ClientOptions, RetryConfig, StoreOptions};
pub use s3::S3Backend;
