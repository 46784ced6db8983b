//! Test helper utilities for integration tests

use bytes::Bytes;
use gateway_body::{body_stream_from_bytes, collect_body, BodyStream};
use gateway_budget::InMemoryModelRegistry;
use gateway_config::{EdgeConfig, ObjectStorageConfig};
use gateway_telemetry::{InMemorySink, MetricsClient, MetricsSink};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Serialize `value` and split it into `chunk_size`-byte chunks
pub fn chunked_body(value: &Value, chunk_size: usize) -> (BodyStream, Vec<u8>) {
    let bytes = serde_json::to_vec(value).expect("Failed to serialize body");
    let chunks = bytes.chunks(chunk_size).map(Bytes::copy_from_slice).collect();
    (body_stream_from_bytes(chunks), bytes)
}

/// Drain a body stream and parse it as JSON
pub async fn collect_json(stream: BodyStream) -> Value {
    let bytes = collect_body(stream).await.expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

/// Metrics client recording every point in memory
pub fn recording_metrics() -> (MetricsClient, Arc<InMemorySink>) {
    let sink = Arc::new(InMemorySink::new());
    let client = MetricsClient::new(Arc::clone(&sink) as Arc<dyn MetricsSink>, 1.0);
    (client, sink)
}

/// Registry with the models used across the tests
pub fn test_registry() -> InMemoryModelRegistry {
    InMemoryModelRegistry::new()
        .with_model("gpt-4", "openai", "gpt-4", 8_192)
        .with_model("gpt-4o", "openai", "gpt-4o", 128_000)
        .with_model("gpt-3.5-turbo", "openai", "gpt-3.5-turbo", 16_385)
        .with_model("llama-prompt-guard-2-22m", "groq", "meta-llama/llama-prompt-guard-2-22m", 512)
        .with_model("tiny-model", "openai", "tiny-model", 64)
}

/// Pipeline configuration pointing at mock services
pub fn edge_config(shards: Vec<String>, storage: Option<ObjectStorageConfig>) -> EdgeConfig {
    let mut config = EdgeConfig::default();
    config.remote_buffer.endpoints = shards;
    config.object_storage = storage;
    config
}
