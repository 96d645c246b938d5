//! Filesystem configuration
//!
//! A [`FsConfig`] describes one filesystem instance: which protocol it
//! serves, how many bucket handles it keeps, and everything handed to the
//! backend when a handle is built. It is usually loaded from TOML:
//!
//! ```toml
//! protocol = "s3"
//! max_cache_size = 10
//! missing_prefix = "empty"
//!
//! [config]
//! region = "eu-west-1"
//!
//! [client]
//! timeout = "30s"
//!
//! [retry]
//! max_retries = 3
//! ```

pub mod duration;

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use objfs_store::{BackoffConfig, ClientOptions, RetryConfig, StoreOptions};
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_MAX_CACHE_SIZE;
use crate::error::{FsError, Result};
use crate::file::DEFAULT_WRITE_CHUNK_SIZE;
use duration::parse_duration;

/// What `ls` returns for a prefix with no objects and no children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPrefix {
    /// Fail with `NotFound`.
    #[default]
    Error,
    /// Return an empty listing.
    Empty,
}

/// HTTP client settings, durations as strings ("30s", "250ms").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
}

/// Retry policy handed to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_init_backoff")]
    pub init_backoff: String,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,
    /// Overall deadline for one operation, retries included.
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout: String,
}

fn default_max_retries() -> usize {
    10
}

fn default_init_backoff() -> String {
    "100ms".to_string()
}

fn default_max_backoff() -> String {
    "15s".to_string()
}

fn default_retry_timeout() -> String {
    "3m".to_string()
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            init_backoff: default_init_backoff(),
            max_backoff: default_max_backoff(),
            retry_timeout: default_retry_timeout(),
        }
    }
}

/// Configuration for one filesystem instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsConfig {
    /// Protocol served, e.g. "s3", "file", "memory".
    pub protocol: String,
    /// Number of per-bucket backend handles kept alive.
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,
    /// Backend settings (region, endpoint, root, credentials, ...).
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub missing_prefix: MissingPrefix,
    /// Writer flush threshold in bytes.
    #[serde(default = "default_write_chunk_size")]
    pub write_chunk_size: usize,
}

fn default_max_cache_size() -> usize {
    DEFAULT_MAX_CACHE_SIZE
}

fn default_write_chunk_size() -> usize {
    DEFAULT_WRITE_CHUNK_SIZE
}

impl FsConfig {
    /// Defaults for `protocol`.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            max_cache_size: default_max_cache_size(),
            config: HashMap::new(),
            client: ClientSettings::default(),
            retry: RetrySettings::default(),
            missing_prefix: MissingPrefix::default(),
            write_chunk_size: default_write_chunk_size(),
        }
    }

    /// Add a backend setting.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: FsConfig = toml::from_str(s).context("Failed to parse filesystem config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Reject settings that can never produce a working filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.protocol.trim().is_empty() {
            return Err(FsError::InvalidArgument(
                "protocol must not be empty".to_string(),
            ));
        }
        if self.max_cache_size == 0 {
            return Err(FsError::InvalidArgument(
                "max_cache_size must be at least 1".to_string(),
            ));
        }
        if self.write_chunk_size == 0 {
            return Err(FsError::InvalidArgument(
                "write_chunk_size must be at least 1".to_string(),
            ));
        }
        self.store_options().map(|_| ())
    }

    /// Options handed to the backend factory.
    pub fn store_options(&self) -> Result<StoreOptions> {
        let duration = |field: &str, value: &str| {
            parse_duration(value)
                .map_err(|e| FsError::InvalidArgument(format!("{field}: {e:#}")))
        };
        let optional = |field: &str, value: &Option<String>| {
            value.as_deref().map(|v| duration(field, v)).transpose()
        };

        let client_options = ClientOptions {
            timeout: optional("client.timeout", &self.client.timeout)?,
            connect_timeout: optional("client.connect_timeout", &self.client.connect_timeout)?,
            user_agent: self.client.user_agent.clone(),
            allow_http: self.client.allow_http,
        };
        let retry_config = RetryConfig {
            backoff: BackoffConfig {
                init_backoff: duration("retry.init_backoff", &self.retry.init_backoff)?,
                max_backoff: duration("retry.max_backoff", &self.retry.max_backoff)?,
            },
            max_retries: self.retry.max_retries,
            retry_timeout: duration("retry.retry_timeout", &self.retry.retry_timeout)?,
        };

        Ok(StoreOptions {
            config: self.config.clone(),
            client_options,
            retry_config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = FsConfig::from_toml_str(r#"protocol = "s3""#).unwrap();
        assert_eq!(config, FsConfig::new("s3"));
        assert_eq!(config.max_cache_size, 10);
        assert_eq!(config.missing_prefix, MissingPrefix::Error);

        let options = config.store_options().unwrap();
        assert_eq!(options.retry_config, RetryConfig::default());
        assert_eq!(options.client_options, ClientOptions::default());
    }

    #[test]
    fn test_full_toml() {
        let config = FsConfig::from_toml_str(
            r#"
protocol = "file"
max_cache_size = 2
missing_prefix = "empty"
write_chunk_size = 1024

[config]
root = "/tmp/data"

[client]
timeout = "30s"
connect_timeout = "250ms"
allow_http = true

[retry]
max_retries = 3
init_backoff = "1s"
"#,
        )
        .unwrap();

        assert_eq!(config.missing_prefix, MissingPrefix::Empty);
        let options = config.store_options().unwrap();
        assert_eq!(options.get("root"), Some("/tmp/data"));
        assert_eq!(options.client_options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(
            options.client_options.connect_timeout,
            Some(Duration::from_millis(250))
        );
        assert!(options.client_options.allow_http);
        assert_eq!(options.retry_config.max_retries, 3);
        assert_eq!(options.retry_config.backoff.init_backoff, Duration::from_secs(1));
        assert_eq!(options.retry_config.backoff.max_backoff, Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(FsConfig::from_toml_str(r#"protocol = """#).is_err());
        assert!(FsConfig::from_toml_str("protocol = \"s3\"\nmax_cache_size = 0").is_err());
        assert!(FsConfig::from_toml_str("protocol = \"s3\"\n[retry]\nmax_backoff = \"soon\"").is_err());
        assert!(matches!(
            FsConfig::new(" ").validate(),
            Err(FsError::InvalidArgument(_))
        ));
    }
}
