//! Per-request body ownership.
//!
//! A [`BodyBuffer`] is either held in memory or parked on a remote buffer
//! container. Operations the chosen strategy cannot perform fail with
//! [`GatewayError::Unsupported`] instead of degrading.

mod in_memory;
mod remote;

pub use in_memory::{InMemoryBuffer, SignedAwsRequest};
pub use remote::RemoteBuffer;

use crate::streaming::BodyStream;
use bytes::Bytes;
use gateway_core::{GatewayError, GatewayResult};
use http::HeaderMap;
use serde_json::Value;
use url::Url;

/// How the body is held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStrategy {
    /// Whole body in memory
    InMemory,
    /// Body uploaded to a shard; only a forward stream stays local
    Remote,
}

impl BufferStrategy {
    /// Strategy name used in errors and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::Remote => "remote",
        }
    }

    /// Remote unless a requirement needs the literal bytes or no shard pool
    /// is available.
    #[must_use]
    pub const fn select(requirements: BufferRequirements, remote_available: bool) -> Self {
        if remote_available && !requirements.needs_literal_body() {
            Self::Remote
        } else {
            Self::InMemory
        }
    }
}

impl std::fmt::Display for BufferStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the request path will need from its body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct BufferRequirements {
    /// Body is rewritten before forwarding
    pub needs_mutation: bool,
    /// Raw text is read back after forwarding
    pub needs_raw_text: bool,
    /// Request is SigV4-signed over its payload
    pub needs_aws_signing: bool,
    /// Token budget remediation may rewrite the body
    pub needs_token_budget: bool,
}

impl BufferRequirements {
    /// Require body mutation
    #[must_use]
    pub const fn with_mutation(mut self) -> Self {
        self.needs_mutation = true;
        self
    }

    /// Require raw text access
    #[must_use]
    pub const fn with_raw_text(mut self) -> Self {
        self.needs_raw_text = true;
        self
    }

    /// Require AWS signing
    #[must_use]
    pub const fn with_aws_signing(mut self) -> Self {
        self.needs_aws_signing = true;
        self
    }

    /// Require token budget remediation
    #[must_use]
    pub const fn with_token_budget(mut self) -> Self {
        self.needs_token_budget = true;
        self
    }

    /// True if any requirement needs the body held locally
    #[must_use]
    pub const fn needs_literal_body(self) -> bool {
        self.needs_mutation || self.needs_raw_text || self.needs_aws_signing || self.needs_token_budget
    }
}

/// The one body owner of a request
#[derive(Debug)]
pub enum BodyBuffer {
    /// Fully buffered
    InMemory(InMemoryBuffer),
    /// Parked on a shard
    Remote(RemoteBuffer),
}

impl From<InMemoryBuffer> for BodyBuffer {
    fn from(buffer: InMemoryBuffer) -> Self {
        Self::InMemory(buffer)
    }
}

impl From<RemoteBuffer> for BodyBuffer {
    fn from(buffer: RemoteBuffer) -> Self {
        Self::Remote(buffer)
    }
}

const fn remote_unsupported(operation: &'static str) -> GatewayError {
    GatewayError::unsupported(operation, BufferStrategy::Remote.as_str())
}

impl BodyBuffer {
    /// Strategy of this buffer
    #[must_use]
    pub const fn strategy(&self) -> BufferStrategy {
        match self {
            Self::InMemory(_) => BufferStrategy::InMemory,
            Self::Remote(_) => BufferStrategy::Remote,
        }
    }

    /// The in-memory buffer, if that is the strategy
    #[must_use]
    pub const fn as_in_memory(&self) -> Option<&InMemoryBuffer> {
        match self {
            Self::InMemory(buffer) => Some(buffer),
            Self::Remote(_) => None,
        }
    }

    /// Mutable in-memory buffer, if that is the strategy
    pub fn as_in_memory_mut(&mut self) -> Option<&mut InMemoryBuffer> {
        match self {
            Self::InMemory(buffer) => Some(buffer),
            Self::Remote(_) => None,
        }
    }

    /// A buffer able to sign AWS requests over its payload
    #[must_use]
    pub const fn as_signing_capable(&self) -> Option<&InMemoryBuffer> {
        self.as_in_memory()
    }

    /// Replace the body
    ///
    /// # Errors
    /// `Unsupported` on remote buffers; `BufferReleased` after delete
    pub fn temp_set_body(&mut self, body: impl Into<Bytes>) -> GatewayResult<()> {
        match self {
            Self::InMemory(buffer) => buffer.temp_set_body(body),
            Self::Remote(_) => Err(remote_unsupported("temp_set_body")),
        }
    }

    /// Body as text
    ///
    /// # Errors
    /// `Unsupported` on remote buffers; `BufferReleased` after delete
    pub fn unsafe_get_raw_text(&self) -> GatewayResult<String> {
        match self {
            Self::InMemory(buffer) => buffer.unsafe_get_raw_text(),
            Self::Remote(_) => Err(remote_unsupported("unsafe_get_raw_text")),
        }
    }

    /// Deep-merge `patch` into the JSON body
    ///
    /// # Errors
    /// `Unsupported` on remote buffers; `InvalidJson` for non-object bodies
    /// or patches
    pub fn set_body_override(&mut self, patch: Value) -> GatewayResult<()> {
        match self {
            Self::InMemory(buffer) => buffer.set_body_override(patch),
            Self::Remote(_) => Err(remote_unsupported("set_body_override")),
        }
    }

    /// Body as a stream
    ///
    /// # Errors
    /// `BodyConsumed` when a remote forward stream was already taken;
    /// `BufferReleased` after delete
    pub fn readable_stream_to_body(&mut self) -> GatewayResult<BodyStream> {
        match self {
            Self::InMemory(buffer) => buffer.readable_stream_to_body(),
            Self::Remote(buffer) => buffer.readable_stream_to_body(),
        }
    }

    /// `stream == true`; false when unknown
    #[must_use]
    pub fn is_stream(&self) -> bool {
        match self {
            Self::InMemory(buffer) => buffer.is_stream(),
            Self::Remote(buffer) => buffer.is_stream(),
        }
    }

    /// `user` field when known
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        match self {
            Self::InMemory(buffer) => buffer.user_id(),
            Self::Remote(buffer) => buffer.user_id(),
        }
    }

    /// `model` field when known
    #[must_use]
    pub fn model(&self) -> Option<String> {
        match self {
            Self::InMemory(buffer) => buffer.model(),
            Self::Remote(buffer) => buffer.model(),
        }
    }

    /// SigV4-sign the body for Bedrock
    ///
    /// # Errors
    /// `Unsupported` on remote buffers; `Authentication` without credentials
    pub fn sign_aws_request(
        &self,
        region: &str,
        forward_to_host: &str,
        headers: &HeaderMap,
        method: &str,
        url: &Url,
    ) -> GatewayResult<SignedAwsRequest> {
        match self {
            Self::InMemory(buffer) => buffer.sign_aws_request(region, forward_to_host, headers, method, url),
            Self::Remote(_) => Err(remote_unsupported("sign_aws_request")),
        }
    }

    /// Archive request and response together
    ///
    /// # Errors
    /// `Unsupported` on remote buffers; storage errors otherwise
    pub async fn upload_s3_body(&mut self, response: Value, key: &str) -> GatewayResult<String> {
        match self {
            Self::InMemory(buffer) => buffer.upload_s3_body(response, key).await,
            Self::Remote(_) => Err(remote_unsupported("upload_s3_body")),
        }
    }

    /// Drop any cached storage client
    pub fn reset_s3_client(&mut self) {
        if let Self::InMemory(buffer) = self {
            buffer.reset_s3_client();
        }
    }

    /// Body size in bytes
    ///
    /// # Errors
    /// `BufferReleased` after delete; upload errors for remote buffers
    pub async fn body_length(&mut self) -> GatewayResult<u64> {
        match self {
            Self::InMemory(buffer) => buffer.body_length(),
            Self::Remote(buffer) => buffer.body_length().await,
        }
    }

    /// Release the body
    pub fn delete(&mut self) {
        match self {
            Self::InMemory(buffer) => buffer.delete(),
            Self::Remote(buffer) => buffer.delete(),
        }
    }
}
