//! Body buffering and streaming integration tests
//!
//! Exercises remote buffering against mock shards and the streaming tee
//! against a mock object store.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_services::*;
use gateway_body::{
    collect_body, BodyBuffer, ContainerRouter, InMemoryBuffer, ObjectStorageClient, RemoteBuffer,
    StreamingBodyHandler,
};
use gateway_core::{GatewayError, RequestId};
use gateway_telemetry::names;
use http::{HeaderMap, HeaderValue};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

/// Routing is a pure function of the request id and spreads over the pool
#[tokio::test]
async fn test_routing_is_stable_and_spread() {
    let shards = MockShardPool::start(3).await;
    let router = ContainerRouter::new(shards.endpoints()).unwrap();
    let again = ContainerRouter::new(shards.endpoints()).unwrap();

    let mut used = HashSet::new();
    for i in 0..300 {
        let id = RequestId::new(format!("req-{i}"));
        let (shard, endpoint) = router.route(&id);
        assert_eq!(again.shard_for(&id), shard);
        assert_eq!(shards.endpoints()[shard.index()], endpoint);
        used.insert(shard);
    }
    assert_eq!(used.len(), 3);
}

/// The body lands on the routed shard only, and the forward copy is intact
#[tokio::test]
async fn test_remote_buffer_uploads_to_routed_shard() {
    init_tracing();
    let shards = MockShardPool::start(3).await;
    let router = ContainerRouter::new(shards.endpoints()).unwrap();
    let request_id = RequestId::new("req-remote-1");
    let shard = router.shard_for(&request_id);

    let (stream, bytes) = chunked_body(&chat_body("gpt-4", &"Hello ".repeat(200)), 64);
    let (metrics, sink) = recording_metrics();
    let mut buffer = RemoteBuffer::spawn(
        request_id,
        stream,
        &router,
        reqwest::Client::new(),
        metrics,
        256,
    );

    let forwarded = collect_body(buffer.readable_stream_to_body().unwrap()).await.unwrap();
    assert_eq!(&forwarded[..], bytes.as_slice());
    assert_eq!(buffer.body_length().await.unwrap(), bytes.len() as u64);
    // memoized
    assert_eq!(buffer.body_length().await.unwrap(), bytes.len() as u64);

    let uploads = shards.uploads().await;
    for (index, received) in uploads.iter().enumerate() {
        if index == shard.index() {
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].0, "/req-remote-1");
            assert_eq!(received[0].1, bytes);
        } else {
            assert!(received.is_empty());
        }
    }
    assert_eq!(
        sink.values(names::REMOTE_BUFFER_UPLOADED_BYTES),
        vec![bytes.len() as f64]
    );
}

/// Operations that need the literal bytes are refused, not degraded
#[tokio::test]
async fn test_remote_buffer_rejects_local_operations() {
    let shards = MockShardPool::start(1).await;
    let router = ContainerRouter::new(shards.endpoints()).unwrap();
    let (stream, _) = chunked_body(&chat_body("gpt-4", "Hello"), 16);
    let remote = RemoteBuffer::spawn(
        RequestId::new("req-unsupported"),
        stream,
        &router,
        reqwest::Client::new(),
        gateway_telemetry::MetricsClient::disabled(),
        1024,
    );
    let mut buffer = BodyBuffer::from(remote);

    assert!(matches!(
        buffer.unsafe_get_raw_text(),
        Err(GatewayError::Unsupported { operation: "unsafe_get_raw_text", .. })
    ));
    assert!(matches!(
        buffer.set_body_override(json!({"model": "x"})),
        Err(GatewayError::Unsupported { .. })
    ));
    assert!(matches!(
        buffer.temp_set_body("{}"),
        Err(GatewayError::Unsupported { .. })
    ));
    let url = Url::parse("https://bedrock-runtime.us-east-1.amazonaws.com/model/m/invoke").unwrap();
    assert!(matches!(
        buffer.sign_aws_request("us-east-1", "example.com", &HeaderMap::new(), "POST", &url),
        Err(GatewayError::Unsupported { .. })
    ));
    assert!(matches!(
        buffer.upload_s3_body(json!({}), "key").await,
        Err(GatewayError::Unsupported { .. })
    ));
    assert_eq!(buffer.user_id(), None);

    drop(collect_body(buffer.readable_stream_to_body().unwrap()).await);
    assert!(matches!(
        buffer.readable_stream_to_body(),
        Err(GatewayError::BodyConsumed)
    ));
}

/// A rejected upload fails the length probe but not the forward stream
#[tokio::test]
async fn test_failed_shard_upload_keeps_forward_stream() {
    let shards = MockShardPool::start_failing(1).await;
    let router = ContainerRouter::new(shards.endpoints()).unwrap();
    let (stream, bytes) = chunked_body(&chat_body("gpt-4", "Hello"), 16);
    let mut buffer = RemoteBuffer::spawn(
        RequestId::new("req-rejected"),
        stream,
        &router,
        reqwest::Client::new(),
        gateway_telemetry::MetricsClient::disabled(),
        1024,
    );

    let forwarded = collect_body(buffer.readable_stream_to_body().unwrap()).await.unwrap();
    assert_eq!(&forwarded[..], bytes.as_slice());
    assert!(matches!(
        buffer.body_length().await,
        Err(GatewayError::RemoteBuffer { .. })
    ));
}

/// Archive, metadata and forward branches all see the same body
#[tokio::test]
async fn test_streaming_handler_archives_and_forwards() {
    init_tracing();
    let storage = MockObjectStorage::start().await;
    let client = ObjectStorageClient::new(&storage.config()).unwrap();
    let payload = chat_body("gpt-4o", &"archive me ".repeat(300));
    let (stream, bytes) = chunked_body(&payload, 100);

    let mut handler = StreamingBodyHandler::new(
        RequestId::new("req-archive"),
        "org-42",
        Some(stream),
        Some(bytes.len() as u64),
    )
    .with_object_storage(Arc::new(client));

    assert_eq!(handler.metadata().await.model.as_deref(), Some("gpt-4o"));
    assert_eq!(handler.metadata().await.temperature, Some(0.7));

    let forwarded = collect_body(handler.body_for_provider_forwarding().await.unwrap())
        .await
        .unwrap();
    assert_eq!(&forwarded[..], bytes.as_slice());

    let url = handler.s3_url().await;
    assert_eq!(
        url,
        format!(
            "{}/edge-archive/organizations/org-42/requests/req-archive/raw_request_response_body",
            storage.server.uri()
        )
    );

    let puts = storage.puts().await;
    assert_eq!(puts.len(), 1);
    let (path, headers, body) = &puts[0];
    assert_eq!(path, "/edge-archive/organizations/org-42/requests/req-archive/raw_request_response_body");
    assert_eq!(body, &bytes);
    assert_eq!(
        headers.get("x-amz-content-sha256"),
        Some(&HeaderValue::from_static("UNSIGNED-PAYLOAD"))
    );
    let authorization = headers.get("authorization").unwrap().to_str().unwrap();
    assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
}

/// Streaming requests gain usage accounting on the forward branch only
#[tokio::test]
async fn test_streaming_request_gets_usage_accounting() {
    let storage = MockObjectStorage::start().await;
    let client = ObjectStorageClient::new(&storage.config()).unwrap();
    let payload = streaming_prompt_body("gpt-4o");
    let (stream, bytes) = chunked_body(&payload, 8);

    let mut handler = StreamingBodyHandler::new(RequestId::new("req-usage"), "org-1", Some(stream), None)
        .with_object_storage(Arc::new(client));

    let metadata = handler.metadata().await.clone();
    assert_eq!(metadata.model.as_deref(), Some("gpt-4o"));
    assert_eq!(metadata.stream, Some(true));

    let forwarded = collect_json(handler.body_for_provider_forwarding().await.unwrap()).await;
    assert_eq!(
        forwarded,
        json!({
            "model": "gpt-4o",
            "prompt": "Tell me a story",
            "stream": true,
            "stream_options": {"include_usage": true}
        })
    );

    assert!(!handler.s3_url().await.is_empty());
    let puts = storage.puts().await;
    assert_eq!(puts[0].2, bytes);
}

/// A failing store degrades archival to an empty URL
#[tokio::test]
async fn test_archival_failure_is_absorbed() {
    let storage = MockObjectStorage::start_failing().await;
    let client = ObjectStorageClient::new(&storage.config()).unwrap();
    let (stream, bytes) = chunked_body(&chat_body("gpt-4", "Hello"), 16);

    let mut handler = StreamingBodyHandler::new(RequestId::new("req-fail"), "org-1", Some(stream), None)
        .with_object_storage(Arc::new(client));

    let forwarded = collect_body(handler.take_forward_stream().await.unwrap()).await.unwrap();
    assert_eq!(&forwarded[..], bytes.as_slice());
    assert_eq!(handler.s3_url().await, "");
}

/// In-memory buffers archive request and response together
#[tokio::test]
async fn test_in_memory_upload_merges_request_and_response() {
    let storage = MockObjectStorage::start().await;
    let request = chat_body("gpt-4", "Hello");
    let mut buffer = BodyBuffer::from(
        InMemoryBuffer::new(serde_json::to_vec(&request).unwrap()).with_object_storage(storage.config()),
    );

    let response = json!({"id": "chatcmpl-1", "choices": []});
    let url = buffer.upload_s3_body(response.clone(), "orgs/o/req-1.json").await.unwrap();
    assert_eq!(url, format!("{}/edge-archive/orgs/o/req-1.json", storage.server.uri()));

    let puts = storage.puts().await;
    let stored: Value = serde_json::from_slice(&puts[0].2).unwrap();
    assert_eq!(stored, json!({"request": request, "response": response}));

    buffer.delete();
    assert!(matches!(buffer.body_length().await, Err(GatewayError::BufferReleased)));
}

/// Bedrock signing keeps only allow-listed headers
#[tokio::test]
async fn test_in_memory_aws_signing() {
    let buffer = BodyBuffer::from(InMemoryBuffer::new(r#"{"prompt":"hi"}"#));
    let url = Url::parse(
        "https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-3-sonnet-20240229-v1%3A0/invoke",
    )
    .unwrap();

    let mut headers = HeaderMap::new();
    headers.insert("aws-access-key", HeaderValue::from_static("AKIDEXAMPLE"));
    headers.insert("aws-secret-key", HeaderValue::from_static("secret"));
    headers.insert("x-amzn-bedrock-trace", HeaderValue::from_static("ENABLED"));
    headers.insert("x-custom-header", HeaderValue::from_static("dropped"));

    let signed = buffer
        .sign_aws_request("us-east-1", "bedrock-runtime.us-east-1.amazonaws.com", &headers, "POST", &url)
        .unwrap();

    assert_eq!(
        signed.headers.get("host"),
        Some(&HeaderValue::from_static("bedrock-runtime.us-east-1.amazonaws.com"))
    );
    assert_eq!(
        signed.headers.get("content-type"),
        Some(&HeaderValue::from_static("application/json"))
    );
    assert_eq!(
        signed.headers.get("x-amzn-bedrock-trace"),
        Some(&HeaderValue::from_static("ENABLED"))
    );
    assert!(signed.headers.get("x-custom-header").is_none());
    assert!(signed.headers.get("aws-secret-key").is_none());
    assert!(signed.headers.contains_key("x-amz-date"));
    assert!(signed.headers.contains_key("authorization"));

    let missing = buffer.sign_aws_request("us-east-1", "example.com", &HeaderMap::new(), "POST", &url);
    assert!(matches!(missing, Err(GatewayError::Authentication { .. })));
}
