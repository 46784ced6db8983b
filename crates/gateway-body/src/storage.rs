//! S3-compatible object storage client.

use crate::sigv4::{self, AwsCredentials, PayloadHash, SigningRequest, S3_SERVICE};
use crate::streaming::BodyStream;
use bytes::Bytes;
use gateway_config::ObjectStorageConfig;
use gateway_core::{GatewayError, GatewayResult, RequestId};
use secrecy::ExposeSecret;
use std::collections::BTreeMap;
use tracing::{debug, instrument};
use url::Url;

/// Signed PUT client for one bucket
#[derive(Debug, Clone)]
pub struct ObjectStorageClient {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    region: String,
    credentials: AwsCredentials,
}

impl ObjectStorageClient {
    /// Create a client with its own HTTP connection pool
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &ObjectStorageConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::configuration(format!("object storage client: {e}")))?;
        Ok(Self::with_client(config, client))
    }

    /// Create a client sharing an existing HTTP client
    #[must_use]
    pub fn with_client(config: &ObjectStorageConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            credentials: AwsCredentials::new(
                config.access_key.expose_secret().as_str(),
                config.secret_key.expose_secret().as_str(),
            ),
        }
    }

    /// Key of the archived raw request body
    #[must_use]
    pub fn raw_request_response_key(org_id: &str, request_id: &RequestId) -> String {
        format!("organizations/{org_id}/requests/{request_id}/raw_request_response_body")
    }

    /// Stored URL for `key`
    ///
    /// # Errors
    /// Returns error if the endpoint and key do not form a valid URL
    pub fn object_url(&self, key: &str) -> GatewayResult<Url> {
        let raw = format!("{}/{}/{}", self.endpoint, self.bucket, key.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| GatewayError::storage(format!("invalid object URL {raw}: {e}"), None))
    }

    /// Upload a fully buffered object; the payload hash is signed
    ///
    /// # Errors
    /// Returns error on transport failure or a non-success status
    #[instrument(skip(self, body), fields(bucket = %self.bucket, size = body.len()))]
    pub async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> GatewayResult<String> {
        let url = self.object_url(key)?;
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        sigv4::sign(
            &self.credentials,
            &SigningRequest::new("PUT", &url, &self.region, S3_SERVICE, PayloadHash::Bytes(&body)),
            &mut headers,
        )?;

        let request = apply_headers(self.client.put(url.clone()), &headers).body(body);
        self.send(request, url).await
    }

    /// Upload a streamed object signed as `UNSIGNED-PAYLOAD`
    ///
    /// `content_length` is sent as-is; without it the body is chunked.
    ///
    /// # Errors
    /// Returns error on transport failure or a non-success status
    #[instrument(skip(self, body), fields(bucket = %self.bucket))]
    pub async fn put_stream(
        &self,
        key: &str,
        body: BodyStream,
        content_length: Option<u64>,
        content_type: &str,
    ) -> GatewayResult<String> {
        let url = self.object_url(key)?;
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        sigv4::sign(
            &self.credentials,
            &SigningRequest::new("PUT", &url, &self.region, S3_SERVICE, PayloadHash::Unsigned),
            &mut headers,
        )?;

        let mut request = apply_headers(self.client.put(url.clone()), &headers);
        if let Some(length) = content_length {
            request = request.header(http::header::CONTENT_LENGTH, length);
        }
        let request = request.body(reqwest::Body::wrap_stream(body));
        self.send(request, url).await
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: Url) -> GatewayResult<String> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::storage(format!("object upload failed: {e}"), None))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::storage(
                format!("object upload rejected: {body}"),
                Some(status.as_u16()),
            ));
        }

        debug!(url = %url, "Object stored");
        Ok(url.to_string())
    }
}

// reqwest derives `host` from the URL; it matches the signed value.
fn apply_headers(
    mut request: reqwest::RequestBuilder,
    headers: &BTreeMap<String, String>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        if name != "host" {
            request = request.header(name.as_str(), value.as_str());
        }
    }
    request
}
