//! Filesystem path to bucket/key translation
//!
//! Paths come in two forms: URLs (`s3://bucket/key`) and bare paths
//! (`bucket/key`). For bucket-addressed protocols the first segment is the
//! bucket; for the others the whole path is the key and the bucket is empty.

use crate::error::{FsError, Result};

/// Protocols whose paths carry no bucket segment.
const UNBUCKETED_PROTOCOLS: &[&str] = &["file", "memory", "http", "https"];

/// Splits filesystem paths for one protocol. Pure; safe to share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    protocol: String,
}

impl PathResolver {
    /// Create a resolver. Fails on an empty protocol string.
    pub fn new(protocol: impl Into<String>) -> Result<Self> {
        let protocol = protocol.into();
        if protocol.trim().is_empty() {
            return Err(FsError::InvalidArgument(
                "protocol must not be empty".to_string(),
            ));
        }
        Ok(Self { protocol })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Whether the first path segment names a bucket.
    pub fn is_bucket_addressed(&self) -> bool {
        !UNBUCKETED_PROTOCOLS.contains(&self.protocol.as_str())
    }

    /// Remove a leading `protocol://`, rejecting foreign schemes.
    ///
    /// Only a prefix without `/` counts as a scheme.
    ///
    /// Paths of the HTTP protocols are URLs themselves and are returned
    /// unchanged.
    pub fn strip_protocol<'a>(&self, path: &'a str) -> Result<&'a str> {
        let Some((scheme, rest)) = path.split_once("://") else {
            return Ok(path);
        };
        // A `://` after the first segment belongs to the key.
        if scheme.contains('/') {
            return Ok(path);
        }
        if matches!(self.protocol.as_str(), "http" | "https")
            && matches!(scheme, "http" | "https")
        {
            return Ok(path);
        }
        if scheme != self.protocol {
            return Err(FsError::ProtocolMismatch {
                expected: self.protocol.clone(),
                found: scheme.to_string(),
                path: path.to_string(),
            });
        }
        Ok(rest)
    }

    /// Split `path` into `(bucket, key)`.
    pub fn split(&self, path: &str) -> Result<(String, String)> {
        let rest = self.strip_protocol(path)?;
        if matches!(self.protocol.as_str(), "http" | "https") {
            return Ok((String::new(), rest.to_string()));
        }

        let rest = rest.trim_start_matches('/');
        if !self.is_bucket_addressed() {
            return Ok((String::new(), rest.to_string()));
        }

        match rest.split_once('/') {
            Some((bucket, key)) => Ok((bucket.to_string(), key.to_string())),
            None => Ok((rest.to_string(), String::new())),
        }
    }

    /// Canonical name for a path: no protocol, no trailing `/`.
    pub fn normalize(&self, path: &str) -> Result<String> {
        let (bucket, key) = self.split(path)?;
        Ok(join_name(&bucket, key.trim_end_matches('/')))
    }

    /// Canonical name of the parent directory (empty at the root).
    pub fn parent(&self, path: &str) -> Result<String> {
        let name = self.normalize(path)?;
        Ok(match name.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        })
    }
}

/// Record name for `key` inside `bucket`.
pub fn join_name(bucket: &str, key: &str) -> String {
    match (bucket.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => bucket.to_string(),
        (false, false) => format!("{bucket}/{key}"),
    }
}
