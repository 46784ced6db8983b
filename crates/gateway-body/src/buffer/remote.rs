//! Body parked on a remote buffer container.

use crate::router::ContainerRouter;
use crate::streaming::{tee, BodyMetadata, BodyStream};
use gateway_core::{GatewayError, GatewayResult, RequestId, ShardId};
use gateway_telemetry::{names, MetricsClient};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

#[derive(Debug, Deserialize)]
struct UploadAck {
    size: u64,
}

/// Request body uploaded to a shard while a forward copy streams onward.
///
/// Only the forward stream, metadata probes, `body_length` and `delete` are
/// available; everything needing the literal bytes is unsupported.
pub struct RemoteBuffer {
    request_id: RequestId,
    shard: ShardId,
    endpoint: String,
    forward: Option<BodyStream>,
    upload: Option<JoinHandle<GatewayResult<u64>>>,
    uploaded_size: Option<u64>,
    metadata: Option<BodyMetadata>,
    released: bool,
}

impl std::fmt::Debug for RemoteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBuffer")
            .field("request_id", &self.request_id)
            .field("shard", &self.shard)
            .field("endpoint", &self.endpoint)
            .field("forward_taken", &self.forward.is_none())
            .field("uploaded_size", &self.uploaded_size)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl RemoteBuffer {
    /// Start uploading `body` to the request's shard. Does not wait for the
    /// upload.
    #[instrument(skip_all, fields(request_id = %request_id))]
    pub fn spawn(
        request_id: RequestId,
        body: BodyStream,
        router: &ContainerRouter,
        client: reqwest::Client,
        metrics: MetricsClient,
        branch_capacity: usize,
    ) -> Self {
        let (shard, endpoint) = router.route(&request_id);
        let endpoint = endpoint.to_string();
        let [upload_branch, forward] = tee(body, branch_capacity);

        let url = format!("{endpoint}/{request_id}");
        debug!(%shard, url = %url, "Uploading body to remote buffer");
        let upload = tokio::spawn(async move {
            let result = upload_body(&client, &url, upload_branch).await;
            match &result {
                Ok(size) => metrics.track_memory(
                    names::REMOTE_BUFFER_UPLOADED_BYTES,
                    usize::try_from(*size).unwrap_or(usize::MAX),
                ),
                Err(e) => warn!(error = %e, url = %url, "Remote buffer upload failed"),
            }
            result
        });

        Self {
            request_id,
            shard,
            endpoint,
            forward: Some(forward),
            upload: Some(upload),
            uploaded_size: None,
            metadata: None,
            released: false,
        }
    }

    /// Attach sniffed metadata used to answer probes
    #[must_use]
    pub fn with_metadata(mut self, metadata: BodyMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Shard holding the body
    #[must_use]
    pub const fn shard(&self) -> ShardId {
        self.shard
    }

    /// Base endpoint of the shard
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn ensure_live(&self) -> GatewayResult<()> {
        if self.released {
            Err(GatewayError::BufferReleased)
        } else {
            Ok(())
        }
    }

    /// Take the forward stream
    ///
    /// # Errors
    /// Returns `BodyConsumed` on the second call, `BufferReleased` after
    /// [`Self::delete`]
    pub fn readable_stream_to_body(&mut self) -> GatewayResult<BodyStream> {
        self.ensure_live()?;
        self.forward.take().ok_or(GatewayError::BodyConsumed)
    }

    /// `stream` from attached metadata
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.stream)
            .unwrap_or(false)
    }

    /// Not tracked by the metadata scan
    #[must_use]
    pub const fn user_id(&self) -> Option<String> {
        None
    }

    /// `model` from attached metadata
    #[must_use]
    pub fn model(&self) -> Option<String> {
        self.metadata.as_ref().and_then(|m| m.model.clone())
    }

    /// Size acknowledged by the shard.
    ///
    /// Resolves once the upload finishes. The upload shares a tee with the
    /// forward stream, so take and drain (or drop) the forward stream first.
    ///
    /// # Errors
    /// Returns error if the upload failed or the buffer was released
    pub async fn body_length(&mut self) -> GatewayResult<u64> {
        self.ensure_live()?;
        if let Some(size) = self.uploaded_size {
            return Ok(size);
        }

        let handle = self
            .upload
            .take()
            .ok_or_else(|| GatewayError::remote_buffer("upload result already consumed"))?;
        let size = handle
            .await
            .map_err(|e| GatewayError::internal(format!("remote upload task failed: {e}")))??;
        self.uploaded_size = Some(size);
        Ok(size)
    }

    /// Release the handle. A running upload is left to finish.
    pub fn delete(&mut self) {
        self.released = true;
        self.forward = None;
        self.metadata = None;
    }
}

async fn upload_body(client: &reqwest::Client, url: &str, body: BodyStream) -> GatewayResult<u64> {
    let response = client
        .post(url)
        .body(reqwest::Body::wrap_stream(body))
        .send()
        .await
        .map_err(|e| GatewayError::remote_buffer(format!("upload request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::remote_buffer(format!(
            "shard rejected upload with status {status}"
        )));
    }

    let ack: UploadAck = response
        .json()
        .await
        .map_err(|e| GatewayError::remote_buffer(format!("invalid upload acknowledgement: {e}")))?;
    Ok(ack.size)
}
