//! Mock remote buffer shards and object storage for integration testing
//!
//! Provides wiremock-based servers that accept body uploads the way the
//! remote containers and an S3-compatible store do.

use gateway_config::ObjectStorageConfig;
use serde_json::json;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Acknowledges an upload with the number of bytes received
struct SizeAck;

impl Respond for SizeAck {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"size": request.body.len()}))
    }
}

/// A pool of mock remote buffer containers
pub struct MockShardPool {
    pub servers: Vec<MockServer>,
}

impl MockShardPool {
    /// Start `size` shards that accept every upload
    pub async fn start(size: usize) -> Self {
        let mut servers = Vec::with_capacity(size);
        for _ in 0..size {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path_regex(r"^/[^/]+$"))
                .respond_with(SizeAck)
                .mount(&server)
                .await;
            servers.push(server);
        }
        Self { servers }
    }

    /// Start `size` shards that reject every upload
    pub async fn start_failing(size: usize) -> Self {
        let mut servers = Vec::with_capacity(size);
        for _ in 0..size {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;
            servers.push(server);
        }
        Self { servers }
    }

    /// Endpoints in pool order
    pub fn endpoints(&self) -> Vec<String> {
        self.servers.iter().map(MockServer::uri).collect()
    }

    /// Uploads received per shard, as `(path, body)`
    pub async fn uploads(&self) -> Vec<Vec<(String, Vec<u8>)>> {
        let mut uploads = Vec::with_capacity(self.servers.len());
        for server in &self.servers {
            let requests = server.received_requests().await.unwrap_or_default();
            uploads.push(
                requests
                    .into_iter()
                    .map(|r| (r.url.path().to_string(), r.body))
                    .collect(),
            );
        }
        uploads
    }
}

/// Mock S3-compatible object store
pub struct MockObjectStorage {
    pub server: MockServer,
    pub bucket: String,
}

impl MockObjectStorage {
    /// Store that accepts every PUT into the bucket
    pub async fn start() -> Self {
        let storage = Self::unmounted().await;
        Mock::given(method("PUT"))
            .and(path_regex(format!("^/{}/.+", storage.bucket)))
            .respond_with(ResponseTemplate::new(200))
            .mount(&storage.server)
            .await;
        storage
    }

    /// Store that rejects every PUT
    pub async fn start_failing() -> Self {
        let storage = Self::unmounted().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&storage.server)
            .await;
        storage
    }

    async fn unmounted() -> Self {
        Self {
            server: MockServer::start().await,
            bucket: "edge-archive".to_string(),
        }
    }

    /// Configuration pointing at this store
    pub fn config(&self) -> ObjectStorageConfig {
        ObjectStorageConfig::new(self.server.uri(), &self.bucket, "AKIDEXAMPLE", "test-secret-key")
    }

    /// Stored objects as `(path, headers, body)`
    pub async fn puts(&self) -> Vec<(String, http::HeaderMap, Vec<u8>)> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == "PUT")
            .map(|r| (r.url.path().to_string(), r.headers, r.body))
            .collect()
    }
}
