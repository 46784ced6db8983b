//! End-to-end edge pipeline tests
//!
//! Drives [`EdgePipeline`] against mock shards and a mock object store, from
//! body intake through provider hand-off to request completion.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_services::*;
use gateway_body::{collect_body, BufferRequirements, BufferStrategy};
use gateway_budget::RemediationStrategy;
use gateway_config::EdgeConfig;
use gateway_telemetry::names;
use http::{HeaderMap, HeaderValue};
use llm_edge_gateway::{EdgePipeline, EdgeRequest};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn pipeline(config: EdgeConfig) -> (EdgePipeline, Arc<gateway_telemetry::InMemorySink>) {
    let (metrics, sink) = recording_metrics();
    let pipeline = EdgePipeline::new(config, Arc::new(test_registry()))
        .expect("Failed to build pipeline")
        .with_metrics(metrics);
    (pipeline, sink)
}

/// Forward-only requests are parked on a shard and archived
#[tokio::test]
async fn test_remote_request_lifecycle() {
    init_tracing();
    let shards = MockShardPool::start(2).await;
    let storage = MockObjectStorage::start().await;
    let (pipeline, sink) = pipeline(edge_config(shards.endpoints(), Some(storage.config())));

    let (body, bytes) = chunked_body(&chat_body("gpt-4", "Hello there"), 32);
    let mut prepared = pipeline
        .prepare(
            EdgeRequest::new("org-7", body)
                .with_request_id("req-pipeline-remote")
                .with_content_length(bytes.len() as u64),
        )
        .await
        .unwrap();

    assert_eq!(prepared.strategy(), BufferStrategy::Remote);
    assert_eq!(prepared.metadata().model.as_deref(), Some("gpt-4"));
    assert_eq!(prepared.buffer().model().as_deref(), Some("gpt-4"));
    assert!(!prepared.was_rewritten());

    let forwarded = collect_body(prepared.body_for_provider().unwrap()).await.unwrap();
    assert_eq!(&forwarded[..], bytes.as_slice());
    assert_eq!(
        prepared.buffer_mut().body_length().await.unwrap(),
        bytes.len() as u64
    );

    prepared.provider_started();
    prepared.provider_finished(200);
    let completed = prepared.finish().await;

    assert_eq!(
        completed.s3_url,
        format!(
            "{}/edge-archive/organizations/org-7/requests/req-pipeline-remote/raw_request_response_body",
            storage.server.uri()
        )
    );
    assert!(completed.phases.pre_request.is_some());
    assert!(completed.phases.provider.is_some());
    assert!(completed.phases.post_request.is_some());
    assert!(completed.phases.total.is_some());

    let uploads: Vec<_> = shards.uploads().await.into_iter().flatten().collect();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "/req-pipeline-remote");
    assert_eq!(uploads[0].1, bytes);

    for name in [
        names::PRE_REQUEST_MS,
        names::PROVIDER_MS,
        names::POST_REQUEST_MS,
        names::TOTAL_MS,
    ] {
        assert_eq!(sink.values(name).len(), 1, "{name}");
    }
    assert_eq!(
        sink.values(names::REMOTE_BUFFER_UPLOADED_BYTES),
        vec![bytes.len() as f64]
    );
}

/// Budget enforcement needs the literal body, so it stays in memory
#[tokio::test]
async fn test_remediation_keeps_body_in_memory() {
    let shards = MockShardPool::start(2).await;
    let (pipeline, _) = pipeline(edge_config(shards.endpoints(), None));

    let payload = serde_json::json!({
        "model": "llama-prompt-guard-2-22m,gpt-4",
        "messages": [{"role": "user", "content": "x".repeat(4000)}]
    });
    let (body, _) = chunked_body(&payload, 128);
    let mut prepared = pipeline
        .prepare(EdgeRequest::new("org-1", body).with_remediation(RemediationStrategy::ModelFallback))
        .await
        .unwrap();

    assert_eq!(prepared.strategy(), BufferStrategy::InMemory);
    assert!(prepared.was_rewritten());
    // metadata reflects the inbound body
    assert_eq!(
        prepared.metadata().model.as_deref(),
        Some("llama-prompt-guard-2-22m,gpt-4")
    );

    let forwarded = collect_json(prepared.body_for_provider().unwrap()).await;
    assert_eq!(forwarded["model"], "gpt-4");
    assert_eq!(forwarded["messages"], payload["messages"]);

    let completed = prepared.finish().await;
    assert_eq!(completed.s3_url, "");
    assert!(shards.uploads().await.iter().all(Vec::is_empty));
}

/// Signing requires the in-memory strategy and works through the buffer
#[tokio::test]
async fn test_aws_signing_requirement() {
    let shards = MockShardPool::start(1).await;
    let (pipeline, _) = pipeline(edge_config(shards.endpoints(), None));
    let requirements = BufferRequirements::default().with_aws_signing();
    assert_eq!(pipeline.select_strategy(requirements), BufferStrategy::InMemory);
    assert_eq!(
        pipeline.select_strategy(BufferRequirements::default()),
        BufferStrategy::Remote
    );

    let (body, _) = chunked_body(&chat_body("anthropic.claude-3-sonnet", "Hi"), 16);
    let prepared = pipeline
        .prepare(EdgeRequest::new("org-1", body).with_requirements(requirements))
        .await
        .unwrap();
    assert_eq!(prepared.strategy(), BufferStrategy::InMemory);

    let mut headers = HeaderMap::new();
    headers.insert("aws-access-key", HeaderValue::from_static("AKIDEXAMPLE"));
    headers.insert("aws-secret-key", HeaderValue::from_static("secret"));
    let url = Url::parse("https://bedrock-runtime.us-west-2.amazonaws.com/model/m/invoke").unwrap();
    let signed = prepared
        .buffer()
        .sign_aws_request("us-west-2", "bedrock-runtime.us-west-2.amazonaws.com", &headers, "POST", &url)
        .unwrap();
    let authorization = signed.headers.get("authorization").unwrap().to_str().unwrap();
    assert!(authorization.contains("/us-west-2/bedrock/aws4_request"));
}

/// Streaming requests reach the shard with usage accounting enabled
#[tokio::test]
async fn test_streaming_request_through_remote_buffer() {
    let shards = MockShardPool::start(1).await;
    let storage = MockObjectStorage::start().await;
    let (pipeline, _) = pipeline(edge_config(shards.endpoints(), Some(storage.config())));

    let payload = streaming_prompt_body("gpt-4o");
    let (body, bytes) = chunked_body(&payload, 8);
    let mut prepared = pipeline.prepare(EdgeRequest::new("org-1", body)).await.unwrap();
    assert!(prepared.buffer().is_stream());

    let forwarded = collect_json(prepared.body_for_provider().unwrap()).await;
    assert_eq!(forwarded["stream_options"], serde_json::json!({"include_usage": true}));
    assert_eq!(forwarded["prompt"], payload["prompt"]);
    prepared.buffer_mut().body_length().await.unwrap();

    let completed = prepared.finish().await;
    assert!(!completed.s3_url.is_empty());

    // the archive keeps the inbound bytes, the shard gets the forwarded body
    assert_eq!(storage.puts().await[0].2, bytes);
    let uploads: Vec<_> = shards.uploads().await.into_iter().flatten().collect();
    let uploaded: serde_json::Value = serde_json::from_slice(&uploads[0].1).unwrap();
    assert_eq!(uploaded, forwarded);
}

/// Finishing without reading the forward body still completes archival
#[tokio::test]
async fn test_finish_without_forwarding_large_body() {
    let shards = MockShardPool::start(1).await;
    let storage = MockObjectStorage::start().await;
    let (pipeline, _) = pipeline(edge_config(shards.endpoints(), Some(storage.config())));

    let (body, bytes) = chunked_body(&chat_body("gpt-4", &"x".repeat(2_000_000)), 16 * 1024);
    let prepared = pipeline.prepare(EdgeRequest::new("org-1", body)).await.unwrap();
    assert_eq!(prepared.strategy(), BufferStrategy::Remote);

    let completed = tokio::time::timeout(Duration::from_secs(10), prepared.finish())
        .await
        .expect("finish stalled behind the unread forward branch");
    assert!(!completed.s3_url.is_empty());
    assert_eq!(storage.puts().await[0].2, bytes);
}

/// Configuration from YAML with environment overlays builds a working pipeline
#[tokio::test]
async fn test_pipeline_from_yaml_config() {
    let shards = MockShardPool::start(2).await;
    let endpoints = shards.endpoints().join(",");
    let yaml = r#"
remote_buffer:
  timeout: 5s
streaming:
  metadata_scan_limit: 4096
  branch_capacity: 65536
metrics:
  enabled: false
logging:
  level: debug
  format: json
"#;
    let mut config = EdgeConfig::from_yaml_str(yaml).unwrap();
    config
        .apply_overrides_from(|key| (key == "EDGE_REMOTE_BUFFER_ENDPOINTS").then(|| endpoints.clone()))
        .unwrap();
    config.validate().unwrap();
    assert_eq!(config.remote_buffer.endpoints.len(), 2);

    let pipeline = EdgePipeline::new(config, Arc::new(test_registry())).unwrap();
    assert!(!pipeline.metrics().is_enabled());
    assert_eq!(
        pipeline.select_strategy(BufferRequirements::default()),
        BufferStrategy::Remote
    );

    let (body, bytes) = chunked_body(&chat_body("gpt-4", "yaml"), 16);
    let mut prepared = pipeline.prepare(EdgeRequest::new("org-1", body)).await.unwrap();
    let forwarded = collect_body(prepared.body_for_provider().unwrap()).await.unwrap();
    assert_eq!(&forwarded[..], bytes.as_slice());
    assert_eq!(
        prepared.buffer_mut().body_length().await.unwrap(),
        bytes.len() as u64
    );
}

/// A failing shard does not fail the forward path
#[tokio::test]
async fn test_failing_shard_still_forwards() {
    let shards = MockShardPool::start_failing(1).await;
    let (pipeline, sink) = pipeline(edge_config(shards.endpoints(), None));

    let (body, bytes) = chunked_body(&chat_body("gpt-4", "Hello"), 16);
    let mut prepared = pipeline.prepare(EdgeRequest::new("org-1", body)).await.unwrap();
    let forwarded = collect_body(prepared.body_for_provider().unwrap()).await.unwrap();
    assert_eq!(&forwarded[..], bytes.as_slice());
    assert!(prepared.buffer_mut().body_length().await.is_err());

    prepared.finish().await;
    assert!(sink.values(names::REMOTE_BUFFER_UPLOADED_BYTES).is_empty());
}
