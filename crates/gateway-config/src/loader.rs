//! Loading, environment overlay, and validation.

use crate::config::{EdgeConfig, ObjectStorageConfig};
use gateway_core::GatewayError;
use secrecy::SecretString;
use std::path::Path;
use tracing::debug;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// YAML could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range or malformed
    #[error("Invalid config value for {field}: {message}")]
    Invalid {
        /// Offending field
        field: String,
        /// Error message
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

impl EdgeConfig {
    /// Parse configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Load from an optional file, overlay `EDGE_*` variables, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.apply_storage_overrides(&lookup);

        if let Some(endpoints) = lookup("EDGE_REMOTE_BUFFER_ENDPOINTS") {
            self.remote_buffer.endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(ToString::to_string)
                .collect();
            debug!(
                count = self.remote_buffer.endpoints.len(),
                "Remote buffer endpoints overridden from environment"
            );
        }

        if let Some(rate) = lookup("EDGE_METRICS_SAMPLE_RATE") {
            self.metrics.sample_rate = rate.trim().parse().map_err(|_| {
                ConfigError::invalid("metrics.sample_rate", format!("not a number: {rate}"))
            })?;
        }

        if let Some(level) = lookup("EDGE_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    fn apply_storage_overrides<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup("EDGE_S3_ENDPOINT");
        let bucket = lookup("EDGE_S3_BUCKET");
        let region = lookup("EDGE_S3_REGION");
        let access_key = lookup("EDGE_S3_ACCESS_KEY");
        let secret_key = lookup("EDGE_S3_SECRET_KEY");

        match self.object_storage.as_mut() {
            Some(storage) => {
                if let Some(endpoint) = endpoint {
                    storage.endpoint = endpoint;
                }
                if let Some(bucket) = bucket {
                    storage.bucket = bucket;
                }
                if let Some(region) = region {
                    storage.region = region;
                }
                if let Some(key) = access_key {
                    storage.access_key = SecretString::new(key);
                }
                if let Some(key) = secret_key {
                    storage.secret_key = SecretString::new(key);
                }
            }
            None => {
                // A storage section can only be created from the environment
                // when every required field is present.
                if let (Some(endpoint), Some(bucket), Some(access_key), Some(secret_key)) =
                    (endpoint, bucket, access_key, secret_key)
                {
                    let mut storage =
                        ObjectStorageConfig::new(endpoint, bucket, access_key, secret_key);
                    if let Some(region) = region {
                        storage.region = region;
                    }
                    self.object_storage = Some(storage);
                }
            }
        }
    }

    /// Check ranges and URLs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.metrics.sample_rate) {
            return Err(ConfigError::invalid(
                "metrics.sample_rate",
                format!("must be within [0, 1], got {}", self.metrics.sample_rate),
            ));
        }

        if self.streaming.branch_capacity == 0 {
            return Err(ConfigError::invalid(
                "streaming.branch_capacity",
                "must be greater than zero",
            ));
        }

        if self.streaming.metadata_scan_limit == 0 {
            return Err(ConfigError::invalid(
                "streaming.metadata_scan_limit",
                "must be greater than zero",
            ));
        }

        // The metadata branch is drained first; a smaller branch would stall the tee.
        if self.streaming.branch_capacity < self.streaming.metadata_scan_limit {
            return Err(ConfigError::invalid(
                "streaming.branch_capacity",
                format!(
                    "must be at least metadata_scan_limit ({})",
                    self.streaming.metadata_scan_limit
                ),
            ));
        }

        for endpoint in &self.remote_buffer.endpoints {
            url::Url::parse(endpoint).map_err(|e| {
                ConfigError::invalid("remote_buffer.endpoints", format!("{endpoint}: {e}"))
            })?;
        }

        if let Some(storage) = &self.object_storage {
            url::Url::parse(&storage.endpoint).map_err(|e| {
                ConfigError::invalid("object_storage.endpoint", format!("{}: {e}", storage.endpoint))
            })?;
            if storage.bucket.trim().is_empty() {
                return Err(ConfigError::invalid("object_storage.bucket", "must not be empty"));
            }
        }

        Ok(())
    }
}
