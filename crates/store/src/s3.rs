//! S3 backend
//!
//! One `S3Backend` is bound to one bucket. Creating the underlying client is
//! relatively expensive, so handles are meant to be built once per bucket and
//! reused (see the store cache in the facade crate).

use std::ops::Range;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::backend::{
    directory_prefix, GetResult, ListResult, MultipartUpload, ObjectBackend, ObjectMeta, PutMode,
    PutResult,
};
use crate::error::{Result, StoreError};
use crate::options::StoreOptions;

const STORE: &str = "S3";

fn to_chrono(value: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    value
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or_default()
}

fn size_of(length: Option<i64>) -> u64 {
    length.and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}

/// Backend bound to a single S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Backend {
    /// Wrap an existing client.
    pub fn with_client(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client for `bucket` from the given options.
    ///
    /// Recognized `config` keys: `region`, `endpoint`, `access_key_id`,
    /// `secret_access_key`, `session_token`, `force_path_style`. Without
    /// explicit keys the default AWS credential chain is used.
    pub async fn connect(bucket: &str, options: &StoreOptions) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(options.retry_config.to_sdk())
            .timeout_config(options.to_sdk_timeouts());

        if let Some(region) = options.get("region") {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        if let Some(endpoint) = options.get("endpoint") {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (
            options.get("access_key_id"),
            options.get("secret_access_key"),
        ) {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                key_id,
                secret,
                options.get("session_token").map(str::to_string),
                None,
                "objfs",
            ));
        }

        let sdk_config = loader.load().await;
        let force_path_style = options
            .get("force_path_style")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(force_path_style)
            .build();

        tracing::debug!("Created S3 client for bucket: {}", bucket);
        Ok(Self::with_client(
            aws_sdk_s3::Client::from_conf(s3_config),
            bucket,
        ))
    }

    /// Bucket this handle is bound to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_bytes(&self, key: &str, data: Bytes, mode: PutMode) -> Result<PutResult> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data));
        if mode == PutMode::Create {
            request = request.if_none_match("*");
        }

        let output = request.send().await.map_err(|err| {
            let service = err.into_service_error();
            match service.code() {
                Some("PreconditionFailed") | Some("ConditionalRequestConflict") => {
                    StoreError::AlreadyExists {
                        path: key.to_string(),
                    }
                }
                _ => StoreError::generic(STORE, service),
            }
        })?;

        Ok(PutResult {
            e_tag: output.e_tag,
            version: output.version_id,
        })
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    fn name(&self) -> &'static str {
        STORE
    }

    async fn get(&self, key: &str) -> Result<GetResult> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    StoreError::not_found(key)
                } else {
                    StoreError::generic(STORE, service)
                }
            })?;

        let meta = ObjectMeta {
            location: key.to_string(),
            size: size_of(response.content_length),
            last_modified: to_chrono(response.last_modified.as_ref()),
            e_tag: response.e_tag,
            version: response.version_id,
        };

        let stream = futures::stream::unfold(response.body, |mut body| async move {
            body.try_next()
                .await
                .map_err(|e| StoreError::generic(STORE, e))
                .transpose()
                .map(|chunk| (chunk, body))
        });

        Ok(GetResult {
            meta,
            stream: Box::pin(stream),
        })
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        if range.start >= range.end {
            return Ok(Bytes::new());
        }

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    return Err(StoreError::not_found(key));
                }
                // Ranges starting past the end of the object read as empty.
                if service.code() == Some("InvalidRange") {
                    return Ok(Bytes::new());
                }
                return Err(StoreError::generic(STORE, service));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::generic(STORE, e))?;
        Ok(data.into_bytes())
    }

    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> Result<PutResult> {
        self.put_bytes(key, data, mode).await
    }

    async fn put_multipart(&self, key: &str) -> Result<Box<dyn MultipartUpload>> {
        Ok(Box::new(S3Upload::new(self.clone(), key.to_string())))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StoreError::generic(STORE, err.into_service_error()))?;
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, from))
            .key(to)
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.code() == Some("NoSuchKey") {
                    StoreError::not_found(from)
                } else {
                    StoreError::generic(STORE, service)
                }
            })?;
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_not_found() {
                    StoreError::not_found(key)
                } else {
                    StoreError::generic(STORE, service)
                }
            })?;

        Ok(ObjectMeta {
            location: key.to_string(),
            size: size_of(response.content_length),
            last_modified: to_chrono(response.last_modified.as_ref()),
            e_tag: response.e_tag,
            version: response.version_id,
        })
    }

    async fn list_with_delimiter(&self, prefix: &str) -> Result<ListResult> {
        let prefix = directory_prefix(prefix);
        let mut result = ListResult::default();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/"); // Use delimiter to get only immediate children

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|err| StoreError::generic(STORE, err.into_service_error()))?;

            // Process objects (files at this level)
            for object in response.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                // Skip the prefix itself if it appears as an object
                if key == prefix {
                    continue;
                }
                result.objects.push(ObjectMeta {
                    location: key.to_string(),
                    size: size_of(object.size),
                    last_modified: to_chrono(object.last_modified.as_ref()),
                    e_tag: object.e_tag.clone(),
                    version: None,
                });
            }

            for common in response.common_prefixes() {
                if let Some(p) = common.prefix() {
                    result
                        .common_prefixes
                        .push(p.trim_end_matches('/').to_string());
                }
            }

            // Handle pagination
            if response.is_truncated == Some(true) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        tracing::debug!(
            "Listed {} objects and {} prefixes in S3 prefix: s3://{}/{}",
            result.objects.len(),
            result.common_prefixes.len(),
            self.bucket,
            prefix
        );

        Ok(result)
    }
}

/// Smallest part S3 accepts, except for the last one.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Streaming upload through the S3 multipart API.
///
/// Parts shorter than [`MIN_PART_SIZE`] are held back and merged with the
/// next one. The multipart upload is only created once the first part is
/// ready, so a file that never reaches that size is written with a single
/// `PutObject` on completion.
struct S3Upload {
    backend: S3Backend,
    key: String,
    pending: BytesMut,
    upload_id: Option<String>,
    completed: Vec<CompletedPart>,
}

impl S3Upload {
    fn new(backend: S3Backend, key: String) -> Self {
        Self {
            backend,
            key,
            pending: BytesMut::new(),
            upload_id: None,
            completed: Vec::new(),
        }
    }

    async fn upload_id(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let output = self
            .backend
            .client
            .create_multipart_upload()
            .bucket(&self.backend.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|err| StoreError::generic(STORE, err.into_service_error()))?;
        let id = output
            .upload_id()
            .ok_or_else(|| {
                StoreError::generic(
                    STORE,
                    std::io::Error::other(format!("no upload id returned for '{}'", self.key)),
                )
            })?
            .to_string();
        tracing::debug!("Started multipart upload {} for: {}", id, self.key);
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    /// Send everything held back as the next part.
    async fn send_pending(&mut self) -> Result<()> {
        let upload_id = self.upload_id().await?;
        let data = self.pending.split().freeze();
        let part_number = i32::try_from(self.completed.len() + 1).unwrap_or(i32::MAX);
        let size = data.len();

        let output = self
            .backend
            .client
            .upload_part()
            .bucket(&self.backend.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| StoreError::generic(STORE, err.into_service_error()))?;

        tracing::debug!("Uploaded part {} ({} bytes) of: {}", part_number, size, self.key);
        self.completed.push(
            CompletedPart::builder()
                .set_e_tag(output.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }
}

#[async_trait]
impl MultipartUpload for S3Upload {
    async fn put_part(&mut self, data: Bytes) -> Result<()> {
        self.pending.extend_from_slice(&data);
        if self.pending.len() >= MIN_PART_SIZE {
            self.send_pending().await?;
        }
        Ok(())
    }

    async fn complete(&mut self) -> Result<PutResult> {
        if self.upload_id.is_none() {
            let data = self.pending.split().freeze();
            return self
                .backend
                .put_bytes(&self.key, data, PutMode::Overwrite)
                .await;
        }

        // The last part may be short.
        if !self.pending.is_empty() {
            self.send_pending().await?;
        }
        let upload_id = self.upload_id().await?;
        let parts = std::mem::take(&mut self.completed);
        let output = self
            .backend
            .client
            .complete_multipart_upload()
            .bucket(&self.backend.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| StoreError::generic(STORE, err.into_service_error()))?;
        self.upload_id = None;

        Ok(PutResult {
            e_tag: output.e_tag().map(str::to_string),
            version: output.version_id().map(str::to_string),
        })
    }

    async fn abort(&mut self) -> Result<()> {
        self.pending.clear();
        self.completed.clear();
        let Some(upload_id) = self.upload_id.take() else {
            return Ok(());
        };
        self.backend
            .client
            .abort_multipart_upload()
            .bucket(&self.backend.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| StoreError::generic(STORE, err.into_service_error()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_of_negative_is_zero() {
        assert_eq!(size_of(Some(-1)), 0);
        assert_eq!(size_of(Some(42)), 42);
        assert_eq!(size_of(None), 0);
    }

    #[test]
    fn test_to_chrono() {
        let dt = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        assert_eq!(to_chrono(Some(&dt)).timestamp(), 1_700_000_000);
        assert_eq!(to_chrono(None).timestamp(), 0);
    }

    fn offline_backend() -> S3Backend {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .build();
        S3Backend::with_client(aws_sdk_s3::Client::from_conf(config), "bucket")
    }

    #[tokio::test]
    async fn test_short_parts_are_held_back() {
        let mut upload = S3Upload::new(offline_backend(), "key".to_string());
        upload.put_part(Bytes::from_static(b"abc")).await.unwrap();
        upload.put_part(Bytes::from_static(b"def")).await.unwrap();

        assert_eq!(&upload.pending[..], b"abcdef");
        assert!(upload.upload_id.is_none());
        assert!(upload.completed.is_empty());

        // Nothing was started remotely, so there is nothing to abort.
        tokio_test::assert_ok!(upload.abort().await);
        assert!(upload.pending.is_empty());
    }

    // Integration tests for S3 operations would require AWS credentials
    // or mocking, which is beyond the scope of unit tests
}
