//! Backend construction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::backend::ObjectBackend;
use crate::error::{Result, StoreError};
use crate::http::HttpBackend;
use crate::local::LocalFsBackend;
use crate::memory::InMemoryBackend;
use crate::options::StoreOptions;
use crate::s3::S3Backend;

/// Builds a backend handle for a store URL such as `s3://bucket`.
///
/// Construction may resolve credentials but must not touch stored objects.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn construct(&self, url: &str, options: &StoreOptions)
        -> Result<Arc<dyn ObjectBackend>>;
}

/// Split `scheme://rest` into its parts.
pub fn split_url(url: &str) -> Result<(&str, &str)> {
    url.split_once("://")
        .filter(|(scheme, _)| !scheme.is_empty())
        .ok_or_else(|| StoreError::InvalidPath(format!("missing scheme in store URL: {url}")))
}

/// Factory covering the backends shipped with this crate.
///
/// - `s3://bucket`, `s3a://bucket` -> [`S3Backend`]
/// - `file://...` -> [`LocalFsBackend`] rooted at the `root` setting (default `/`)
/// - `http://...`, `https://...` -> [`HttpBackend`] with the `url` setting as base
/// - `memory://...` -> [`InMemoryBackend`], one store per URL for the factory's lifetime
#[derive(Debug, Default)]
pub struct DefaultBackendFactory {
    memory: Mutex<HashMap<String, InMemoryBackend>>,
}

impl DefaultBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn memory_store(&self, url: &str) -> InMemoryBackend {
        let mut stores = self
            .memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stores.entry(url.to_string()).or_default().clone()
    }
}

#[async_trait]
impl BackendFactory for DefaultBackendFactory {
    async fn construct(
        &self,
        url: &str,
        options: &StoreOptions,
    ) -> Result<Arc<dyn ObjectBackend>> {
        let (scheme, rest) = split_url(url)?;
        let backend: Arc<dyn ObjectBackend> = match scheme {
            "s3" | "s3a" => {
                let bucket = rest.trim_matches('/');
                if bucket.is_empty() {
                    return Err(StoreError::InvalidPath(format!(
                        "S3 URL must name a bucket: {url}"
                    )));
                }
                Arc::new(S3Backend::connect(bucket, options).await?)
            }
            "file" => Arc::new(LocalFsBackend::new(options.get("root").unwrap_or("/"))),
            "http" | "https" => {
                let mut client_options = options.client_options.clone();
                client_options.allow_http |= scheme == "http";
                Arc::new(HttpBackend::new(
                    options.get("url").map(str::to_string),
                    &client_options,
                )?)
            }
            "memory" => Arc::new(self.memory_store(url)),
            other => return Err(StoreError::UnknownProtocol(other.to_string())),
        };
        tracing::info!("Constructed {} backend for {}", backend.name(), url);
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::backend::PutMode;

    #[test]
    fn test_split_url() {
        assert_eq!(split_url("s3://bucket").unwrap(), ("s3", "bucket"));
        assert!(split_url("bucket/key").is_err());
        assert!(split_url("://bucket").is_err());
    }

    #[tokio::test]
    async fn test_memory_store_survives_rebuild() {
        let factory = DefaultBackendFactory::new();
        let options = StoreOptions::default();
        let first = factory.construct("memory://", &options).await.unwrap();
        first
            .put("k", Bytes::from_static(b"v"), PutMode::Overwrite)
            .await
            .unwrap();

        let second = factory.construct("memory://", &options).await.unwrap();
        assert_eq!(second.head("k").await.unwrap().size, 1);
    }

    #[tokio::test]
    async fn test_unknown_protocol() {
        let factory = DefaultBackendFactory::new();
        let err = factory
            .construct("gs://bucket", &StoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownProtocol(p) if p == "gs"));
    }

    #[tokio::test]
    async fn test_local_root_from_options() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let options = StoreOptions::default().with("root", temp_dir.path().to_string_lossy());
        let factory = DefaultBackendFactory::new();
        let backend = factory.construct("file://", &options).await.unwrap();
        backend
            .put("x.txt", Bytes::from_static(b"abc"), PutMode::Overwrite)
            .await
            .unwrap();
        assert!(temp_dir.path().join("x.txt").exists());
    }
}
