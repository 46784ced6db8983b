//! Metrics emission.
//!
//! Metrics are fire-and-forget distribution points. Callers hold a
//! [`MetricsClient`] handed down from the request entry point; there is no
//! process-global registry. The client enforces a strict allow-list, applies a
//! fixed sample rate, attaches no tags, and swallows every sink failure.
//!
//! ## Metrics Exposed
//!
//! | Name | Unit |
//! |------|------|
//! | `gateway.pre_request_ms` | milliseconds |
//! | `gateway.provider_ms` | milliseconds |
//! | `gateway.post_request_ms` | milliseconds |
//! | `gateway.total_ms` | milliseconds |
//! | `memory.request_body_stream` | bytes |
//! | `memory.s3_upload` | bytes |
//! | `remote_buffer.uploaded_bytes` | bytes |

use parking_lot::Mutex;
use prometheus::{Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Allowed metric names
pub mod names {
    /// Time from request start until the outbound call is prepared
    pub const PRE_REQUEST_MS: &str = "gateway.pre_request_ms";
    /// Time spent waiting on the provider
    pub const PROVIDER_MS: &str = "gateway.provider_ms";
    /// Time from provider response until post-processing finished
    pub const POST_REQUEST_MS: &str = "gateway.post_request_ms";
    /// End-to-end time
    pub const TOTAL_MS: &str = "gateway.total_ms";
    /// Size of a request body observed on the streaming path
    pub const REQUEST_BODY_STREAM: &str = "memory.request_body_stream";
    /// Bytes streamed to object storage
    pub const S3_UPLOAD: &str = "memory.s3_upload";
    /// Bytes acknowledged by a remote body container
    pub const REMOTE_BUFFER_UPLOADED_BYTES: &str = "remote_buffer.uploaded_bytes";

    /// Every metric the client will forward
    pub const ALLOWED: &[&str] = &[
        PRE_REQUEST_MS,
        PROVIDER_MS,
        POST_REQUEST_MS,
        TOTAL_MS,
        REQUEST_BODY_STREAM,
        S3_UPLOAD,
        REMOTE_BUFFER_UPLOADED_BYTES,
    ];

    /// True if `name` is on the allow-list
    #[must_use]
    pub fn is_allowed(name: &str) -> bool {
        ALLOWED.contains(&name)
    }
}

/// Metrics sink error
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The sink has no series for this name
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// Prometheus registration or encoding failed
    #[error("Prometheus error: {0}")]
    Prometheus(String),
}

impl From<prometheus::Error> for MetricsError {
    fn from(err: prometheus::Error) -> Self {
        Self::Prometheus(err.to_string())
    }
}

/// Destination for distribution points
pub trait MetricsSink: Send + Sync {
    /// Record one observation
    fn distribution(&self, name: &str, value: f64) -> Result<(), MetricsError>;
}

/// Cloneable handle used to emit metrics
#[derive(Clone)]
pub struct MetricsClient {
    inner: Option<Arc<ClientInner>>,
}

struct ClientInner {
    sink: Arc<dyn MetricsSink>,
    sample_rate: f64,
}

impl MetricsClient {
    /// Create a client that forwards sampled points to `sink`
    #[must_use]
    pub fn new(sink: Arc<dyn MetricsSink>, sample_rate: f64) -> Self {
        Self {
            inner: Some(Arc::new(ClientInner {
                sink,
                sample_rate: sample_rate.clamp(0.0, 1.0),
            })),
        }
    }

    /// Create a client that drops everything
    #[must_use]
    pub const fn disabled() -> Self {
        Self { inner: None }
    }

    /// True if points may be forwarded
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Emit a distribution point.
    ///
    /// Names outside the allow-list are dropped. Never fails.
    pub fn distribution(&self, name: &str, value: f64) {
        let Some(inner) = &self.inner else {
            return;
        };

        if !names::is_allowed(name) {
            debug!(metric = name, "Dropping metric outside allow-list");
            return;
        }

        if inner.sample_rate < 1.0 && rand::thread_rng().gen::<f64>() >= inner.sample_rate {
            return;
        }

        if let Err(e) = inner.sink.distribution(name, value) {
            debug!(metric = name, error = %e, "Metrics sink rejected point");
        }
    }

    /// Emit a byte-size observation
    pub fn track_memory(&self, name: &str, bytes: usize) {
        self.distribution(name, bytes as f64);
    }
}

impl Default for MetricsClient {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for MetricsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsClient")
            .field("enabled", &self.is_enabled())
            .field("sample_rate", &self.inner.as_ref().map(|i| i.sample_rate))
            .finish()
    }
}

/// Prometheus sink with one unlabelled histogram per allowed metric
pub struct PrometheusSink {
    registry: Registry,
    histograms: HashMap<&'static str, Histogram>,
}

impl PrometheusSink {
    /// Register every allowed metric in a private registry
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let mut histograms = HashMap::with_capacity(names::ALLOWED.len());

        for name in names::ALLOWED {
            let histogram = Histogram::with_opts(HistogramOpts::new(
                prometheus_name(name),
                format!("Distribution of {name}"),
            ))?;
            registry.register(Box::new(histogram.clone()))?;
            histograms.insert(*name, histogram);
        }

        Ok(Self {
            registry,
            histograms,
        })
    }

    /// The registry owning the histograms
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of observations recorded for `name`
    #[must_use]
    pub fn sample_count(&self, name: &str) -> u64 {
        self.histograms.get(name).map_or(0, Histogram::get_sample_count)
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Prometheus(e.to_string()))
    }
}

impl MetricsSink for PrometheusSink {
    fn distribution(&self, name: &str, value: f64) -> Result<(), MetricsError> {
        let histogram = self
            .histograms
            .get(name)
            .ok_or_else(|| MetricsError::UnknownMetric(name.to_string()))?;
        histogram.observe(value);
        Ok(())
    }
}

/// Sink that keeps every point in memory
#[derive(Debug, Default)]
pub struct InMemorySink {
    points: Mutex<Vec<(String, f64)>>,
}

impl InMemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded points in emission order
    #[must_use]
    pub fn points(&self) -> Vec<(String, f64)> {
        self.points.lock().clone()
    }

    /// Values recorded for one metric
    #[must_use]
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.points
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl MetricsSink for InMemorySink {
    fn distribution(&self, name: &str, value: f64) -> Result<(), MetricsError> {
        self.points.lock().push((name.to_string(), value));
        Ok(())
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace('.', "_")
}
