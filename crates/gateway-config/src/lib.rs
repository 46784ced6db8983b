//! # Gateway Config
//!
//! Configuration for the LLM Edge Gateway body pipeline.
//!
//! Configuration is read from YAML and then overlaid with `EDGE_*`
//! environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `EDGE_S3_ENDPOINT` | `object_storage.endpoint` |
//! | `EDGE_S3_BUCKET` | `object_storage.bucket` |
//! | `EDGE_S3_REGION` | `object_storage.region` |
//! | `EDGE_S3_ACCESS_KEY` | `object_storage.access_key` |
//! | `EDGE_S3_SECRET_KEY` | `object_storage.secret_key` |
//! | `EDGE_REMOTE_BUFFER_ENDPOINTS` | `remote_buffer.endpoints` (comma-separated) |
//! | `EDGE_METRICS_SAMPLE_RATE` | `metrics.sample_rate` |
//! | `EDGE_LOG_LEVEL` | `logging.level` |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod loader;

pub use config::{
    EdgeConfig, LogFormat, LoggingConfig, MetricsConfig, ObjectStorageConfig, RemoteBufferConfig,
    StreamingConfig,
};
pub use loader::ConfigError;
