//! Configuration types.

use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

/// Root configuration for the edge body pipeline
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdgeConfig {
    /// Object storage used for request/response archival.
    /// Archival is disabled when absent.
    #[serde(default)]
    pub object_storage: Option<ObjectStorageConfig>,

    /// Remote body container pool
    #[serde(default)]
    pub remote_buffer: RemoteBufferConfig,

    /// Streaming tee settings
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Metrics emission
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// S3-compatible object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageConfig {
    /// Base endpoint, e.g. `https://s3.us-west-2.amazonaws.com`
    pub endpoint: String,

    /// Bucket name
    pub bucket: String,

    /// Signing region
    #[serde(default = "default_region")]
    pub region: String,

    /// Access key id
    pub access_key: SecretString,

    /// Secret access key
    pub secret_key: SecretString,

    /// Request timeout
    #[serde(default = "default_storage_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl ObjectStorageConfig {
    /// Create a configuration with default region and timeout
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            region: default_region(),
            access_key: SecretString::new(access_key.into()),
            secret_key: SecretString::new(secret_key.into()),
            timeout: default_storage_timeout(),
        }
    }

    /// Set the signing region
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Remote body container pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteBufferConfig {
    /// Container endpoints; the remote strategy is disabled when empty
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Upload request timeout
    #[serde(default = "default_remote_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RemoteBufferConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout: default_remote_timeout(),
        }
    }
}

impl RemoteBufferConfig {
    /// True when at least one container endpoint is configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.endpoints.is_empty()
    }
}

/// Streaming tee configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    /// Maximum raw bytes the metadata scanner inspects
    #[serde(default = "default_metadata_scan_limit")]
    pub metadata_scan_limit: usize,

    /// Per-branch buffer capacity in bytes
    #[serde(default = "default_branch_capacity")]
    pub branch_capacity: usize,

    /// Request usage accounting from streaming providers
    #[serde(default = "default_true")]
    pub usage_accounting: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            metadata_scan_limit: default_metadata_scan_limit(),
            branch_capacity: default_branch_capacity(),
            usage_accounting: true,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics emission
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fixed sample rate in `[0, 1]`
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: default_sample_rate(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_storage_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_metadata_scan_limit() -> usize {
    100_000
}

fn default_branch_capacity() -> usize {
    256 * 1024
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}
