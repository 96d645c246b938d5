//! HTTP/HTTPS backend (read-only)
//!
//! Keys are either absolute URLs or paths joined onto a base URL. Only
//! reads and metadata are supported; HTTP has no directory listing.

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::header::{HeaderName, CONTENT_LENGTH, ETAG, LAST_MODIFIED, RANGE};
use reqwest::{Response, StatusCode};

use crate::backend::{
    GetResult, ListResult, MultipartUpload, ObjectBackend, ObjectMeta, PutMode, PutResult,
};
use crate::error::{Result, StoreError};
use crate::options::ClientOptions;

const STORE: &str = "HTTP";

/// Backend reading objects over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Option<String>,
}

impl HttpBackend {
    /// Create a backend. `base` is prepended to keys that are not full URLs.
    pub fn new(base: Option<String>, options: &ClientOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = options.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(user_agent) = &options.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if !options.allow_http {
            builder = builder.https_only(true);
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::generic(STORE, e))?;
        Ok(Self { client, base })
    }

    fn url_for(&self, key: &str) -> String {
        if key.starts_with("http://") || key.starts_with("https://") {
            return key.to_string();
        }
        match &self.base {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                key.trim_start_matches('/')
            ),
            None => format!("https://{}", key.trim_start_matches('/')),
        }
    }

    async fn send(&self, key: &str, request: reqwest::RequestBuilder) -> Result<Response> {
        let url = self.url_for(key);
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::generic(STORE, e))?;

        // Check for successful status
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::not_found(key));
        }
        if !status.is_success() {
            return Err(StoreError::generic(
                STORE,
                std::io::Error::other(format!(
                    "HTTP request failed with status {status} for URL: {url}"
                )),
            ));
        }
        Ok(response)
    }

    fn meta_from(key: &str, response: &Response) -> ObjectMeta {
        let headers = response.headers();
        let header = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
        ObjectMeta {
            location: key.to_string(),
            size: header(CONTENT_LENGTH)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            last_modified: header(LAST_MODIFIED)
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
            e_tag: header(ETAG).map(str::to_string),
            version: None,
        }
    }
}

#[async_trait]
impl ObjectBackend for HttpBackend {
    fn name(&self) -> &'static str {
        STORE
    }

    async fn get(&self, key: &str) -> Result<GetResult> {
        let request = self.client.get(self.url_for(key));
        let response = self.send(key, request).await?;
        let meta = Self::meta_from(key, &response);
        let stream = response
            .bytes_stream()
            .map_err(|e| StoreError::generic(STORE, e));
        Ok(GetResult {
            meta,
            stream: Box::pin(stream),
        })
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        if range.start >= range.end {
            return Ok(Bytes::new());
        }
        let request = self
            .client
            .get(self.url_for(key))
            .header(RANGE, format!("bytes={}-{}", range.start, range.end - 1));

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::generic(STORE, e))?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Bytes::new());
        }
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::not_found(key));
        }
        let partial = response.status() == StatusCode::PARTIAL_CONTENT;
        let bytes = response
            .error_for_status()
            .map_err(|e| StoreError::generic(STORE, e))?
            .bytes()
            .await
            .map_err(|e| StoreError::generic(STORE, e))?;

        tracing::debug!("Fetched {} bytes from: {}", bytes.len(), self.url_for(key));

        // Servers that ignore Range send the whole body.
        if partial {
            Ok(bytes)
        } else {
            let end = (range.end as usize).min(bytes.len());
            let start = (range.start as usize).min(end);
            Ok(bytes.slice(start..end))
        }
    }

    async fn put(&self, _key: &str, _data: Bytes, _mode: PutMode) -> Result<PutResult> {
        Err(StoreError::NotSupported {
            store: STORE,
            operation: "put",
        })
    }

    async fn put_multipart(&self, _key: &str) -> Result<Box<dyn MultipartUpload>> {
        Err(StoreError::NotSupported {
            store: STORE,
            operation: "put_multipart",
        })
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(StoreError::NotSupported {
            store: STORE,
            operation: "delete",
        })
    }

    async fn copy(&self, _from: &str, _to: &str) -> Result<()> {
        Err(StoreError::NotSupported {
            store: STORE,
            operation: "copy",
        })
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta> {
        let request = self.client.head(self.url_for(key));
        let response = self.send(key, request).await?;
        Ok(Self::meta_from(key, &response))
    }

    async fn list_with_delimiter(&self, _prefix: &str) -> Result<ListResult> {
        Err(StoreError::NotSupported {
            store: STORE,
            operation: "list_with_delimiter",
        })
    }
}
