//! Backend construction options.
//!
//! These are plain records; parsing them from files or CLI flags is the
//! caller's concern.

use std::collections::HashMap;
use std::time::Duration;

/// Exponential backoff between retries.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub init_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(15),
        }
    }
}

/// Retry policy handed to the backend client. This layer never retries itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub backoff: BackoffConfig,
    pub max_retries: usize,
    /// Give up once this much time has elapsed, retries included.
    pub retry_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_retries: 10,
            retry_timeout: Duration::from_secs(3 * 60),
        }
    }
}

impl RetryConfig {
    /// Translate into the AWS SDK retry policy.
    pub fn to_sdk(&self) -> aws_config::retry::RetryConfig {
        let attempts = u32::try_from(self.max_retries.saturating_add(1)).unwrap_or(u32::MAX);
        aws_config::retry::RetryConfig::standard()
            .with_max_attempts(attempts)
            .with_initial_backoff(self.backoff.init_backoff)
            .with_max_backoff(self.backoff.max_backoff)
    }
}

/// HTTP client settings shared by the network backends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Whole-request timeout.
    pub timeout: Option<Duration>,
    /// Connection establishment timeout.
    pub connect_timeout: Option<Duration>,
    pub user_agent: Option<String>,
    /// Permit plain `http://` endpoints.
    pub allow_http: bool,
}

/// Everything a [`BackendFactory`](crate::BackendFactory) needs besides the URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreOptions {
    /// Backend-specific string settings (region, endpoint, root, ...).
    pub config: HashMap<String, String>,
    pub client_options: ClientOptions,
    pub retry_config: RetryConfig,
}

impl StoreOptions {
    /// Look up a backend setting.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// Builder-style setter used mostly by tests and the CLI.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// AWS SDK timeouts: the client timeout bounds each attempt, the retry
    /// timeout bounds the whole operation.
    pub fn to_sdk_timeouts(&self) -> aws_config::timeout::TimeoutConfig {
        let mut builder = aws_config::timeout::TimeoutConfig::builder();
        builder.set_operation_attempt_timeout(self.client_options.timeout);
        builder.set_connect_timeout(self.client_options.connect_timeout);
        builder.set_operation_timeout(Some(self.retry_config.retry_timeout));
        builder.build()
    }
}
