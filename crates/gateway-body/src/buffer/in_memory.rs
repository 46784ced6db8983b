//! Fully buffered request body.

use crate::merge::deep_merge;
use crate::sigv4::{self, AwsCredentials, PayloadHash, SigningRequest, BEDROCK_SERVICE, FORWARDED_AMZ_HEADERS};
use crate::storage::ObjectStorageClient;
use crate::streaming::{body_stream_from_bytes, collect_body, BodyStream};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use gateway_config::ObjectStorageConfig;
use gateway_core::{GatewayError, GatewayResult};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::{Position, Url};

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Headers and model produced by [`InMemoryBuffer::sign_aws_request`]
#[derive(Debug, Clone)]
pub struct SignedAwsRequest {
    /// Complete outbound header set
    pub headers: HeaderMap,
    /// Model id parsed from the request path
    pub model: Option<String>,
}

/// Request body held in memory.
///
/// The only strategy that can mutate the body, expose it as text, or sign
/// it. `None` marks a released buffer.
#[derive(Debug, Default)]
pub struct InMemoryBuffer {
    body: Option<Bytes>,
    storage_config: Option<ObjectStorageConfig>,
    storage: Option<Arc<ObjectStorageClient>>,
}

impl InMemoryBuffer {
    /// Wrap an already buffered body
    #[must_use]
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: Some(body.into()),
            storage_config: None,
            storage: None,
        }
    }

    /// Buffer a whole stream
    ///
    /// # Errors
    /// Returns the first error the stream yields
    pub async fn from_stream(stream: BodyStream) -> GatewayResult<Self> {
        Ok(Self::new(collect_body(stream).await?))
    }

    /// Enable [`Self::upload_s3_body`]
    #[must_use]
    pub fn with_object_storage(mut self, config: ObjectStorageConfig) -> Self {
        self.storage_config = Some(config);
        self
    }

    fn body(&self) -> GatewayResult<&Bytes> {
        self.body.as_ref().ok_or(GatewayError::BufferReleased)
    }

    fn parsed(&self) -> Option<Value> {
        self.body
            .as_ref()
            .and_then(|body| serde_json::from_slice(body).ok())
    }

    /// Replace the body
    ///
    /// # Errors
    /// Returns `BufferReleased` after [`Self::delete`]
    pub fn temp_set_body(&mut self, body: impl Into<Bytes>) -> GatewayResult<()> {
        self.body()?;
        self.body = Some(body.into());
        Ok(())
    }

    /// Body as text; invalid UTF-8 is replaced
    ///
    /// # Errors
    /// Returns `BufferReleased` after [`Self::delete`]
    pub fn unsafe_get_raw_text(&self) -> GatewayResult<String> {
        Ok(String::from_utf8_lossy(self.body()?).into_owned())
    }

    /// Deep-merge `patch` into the JSON body
    ///
    /// # Errors
    /// Returns `InvalidJson` if the body or the patch is not a JSON object
    pub fn set_body_override(&mut self, patch: Value) -> GatewayResult<()> {
        let mut body: Value = serde_json::from_slice(self.body()?)?;
        if !body.is_object() {
            return Err(GatewayError::invalid_json("body is not a JSON object"));
        }
        if !patch.is_object() {
            return Err(GatewayError::invalid_json("override is not a JSON object"));
        }

        deep_merge(&mut body, patch);
        self.body = Some(Bytes::from(serde_json::to_vec(&body)?));
        Ok(())
    }

    /// Stream over the current body; may be called repeatedly
    ///
    /// # Errors
    /// Returns `BufferReleased` after [`Self::delete`]
    pub fn readable_stream_to_body(&self) -> GatewayResult<BodyStream> {
        Ok(body_stream_from_bytes(vec![self.body()?.clone()]))
    }

    /// `stream == true`
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.parsed()
            .and_then(|body| body.get("stream").and_then(Value::as_bool))
            .unwrap_or(false)
    }

    /// String `user` field
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.string_field("user")
    }

    /// String `model` field
    #[must_use]
    pub fn model(&self) -> Option<String> {
        self.string_field("model")
    }

    fn string_field(&self, name: &str) -> Option<String> {
        self.parsed()?.get(name)?.as_str().map(ToString::to_string)
    }

    /// Sign the body for Bedrock with the caller's AWS credentials.
    ///
    /// Only `content-type` and allow-listed `x-amz*` headers are carried over
    /// from `headers`; `host` becomes `forward_to_host`.
    ///
    /// # Errors
    /// Returns an authentication error when credentials are missing, or
    /// `BufferReleased` after [`Self::delete`]
    pub fn sign_aws_request(
        &self,
        region: &str,
        forward_to_host: &str,
        headers: &HeaderMap,
        method: &str,
        url: &Url,
    ) -> GatewayResult<SignedAwsRequest> {
        self.sign_aws_request_at(region, forward_to_host, headers, method, url, Utc::now())
    }

    pub(crate) fn sign_aws_request_at(
        &self,
        region: &str,
        forward_to_host: &str,
        headers: &HeaderMap,
        method: &str,
        url: &Url,
        timestamp: DateTime<Utc>,
    ) -> GatewayResult<SignedAwsRequest> {
        let body = self.body()?;
        let credentials = AwsCredentials::from_headers(headers)?;

        let target = format!("{}://{}{}", url.scheme(), forward_to_host, &url[Position::BeforePath..]);
        let target = Url::parse(&target).map_err(|e| {
            GatewayError::validation(
                format!("invalid forward host {forward_to_host}: {e}"),
                Some("forward_to_host".to_string()),
                "invalid_url",
            )
        })?;

        let mut signed = BTreeMap::new();
        signed.insert("host".to_string(), forward_to_host.to_string());
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        signed.insert("content-type".to_string(), content_type.to_string());
        for name in FORWARDED_AMZ_HEADERS {
            if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
                signed.insert((*name).to_string(), value.to_string());
            }
        }

        sigv4::sign_at(
            &credentials,
            &SigningRequest::new(method, &target, region, BEDROCK_SERVICE, PayloadHash::Bytes(body)),
            &mut signed,
            timestamp,
        )?;

        let mut out = HeaderMap::with_capacity(signed.len());
        for (name, value) in &signed {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GatewayError::internal(format!("header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| GatewayError::internal(format!("header value for {name}: {e}")))?;
            out.insert(name, value);
        }

        Ok(SignedAwsRequest {
            headers: out,
            model: model_from_path(&target),
        })
    }

    /// Store `{"request": <body>, "response": <response>}` at `key`.
    ///
    /// The request is embedded as JSON when it parses and as a string
    /// otherwise.
    ///
    /// # Errors
    /// Returns error if storage is not configured, the upload fails, or the
    /// buffer was released
    #[instrument(skip(self, response))]
    pub async fn upload_s3_body(&mut self, response: Value, key: &str) -> GatewayResult<String> {
        let request = match self.parsed() {
            Some(parsed) => parsed,
            None => Value::String(self.unsafe_get_raw_text()?),
        };
        let payload = serde_json::to_vec(&json!({"request": request, "response": response}))?;

        let storage = self.storage_client()?;
        storage
            .put_object(key, Bytes::from(payload), DEFAULT_CONTENT_TYPE)
            .await
    }

    fn storage_client(&mut self) -> GatewayResult<Arc<ObjectStorageClient>> {
        if let Some(client) = &self.storage {
            return Ok(Arc::clone(client));
        }
        let config = self
            .storage_config
            .as_ref()
            .ok_or_else(|| GatewayError::configuration("object storage is not configured"))?;
        let client = Arc::new(ObjectStorageClient::new(config)?);
        self.storage = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Drop the cached storage client
    pub fn reset_s3_client(&mut self) {
        self.storage = None;
    }

    /// Body size in bytes
    ///
    /// # Errors
    /// Returns `BufferReleased` after [`Self::delete`]
    pub fn body_length(&self) -> GatewayResult<u64> {
        Ok(self.body()?.len() as u64)
    }

    /// Release the body; later operations fail with `BufferReleased`
    pub fn delete(&mut self) {
        if self.body.take().is_some() {
            debug!("In-memory body released");
        }
        self.storage = None;
    }
}

fn model_from_path(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    let segment = segments.len().checked_sub(2).and_then(|i| segments.get(i))?;
    urlencoding::decode(segment).ok().map(std::borrow::Cow::into_owned)
}
