//! Streaming request body handling.
//!
//! [`StreamingBodyHandler`] fans the inbound body out into three branches:
//! a bounded metadata scan, an archival upload to object storage, and the
//! body forwarded to the provider. Only the forward branch can fail the
//! request; archival and metadata problems degrade to an empty URL or
//! partial metadata.

mod metadata;
mod scanner;
mod splice;
mod tee;

pub use metadata::BodyMetadata;
pub use scanner::{extract_metadata, MetadataScanner, ScanStatus};
pub use splice::StreamOptionsInjector;
pub use tee::tee;

use crate::storage::ObjectStorageClient;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use gateway_config::StreamingConfig;
use gateway_core::{GatewayError, GatewayResult, RequestId};
use gateway_telemetry::{names, MetricsClient};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Owned, sendable stream of body chunks
pub type BodyStream = Pin<Box<dyn Stream<Item = GatewayResult<Bytes>> + Send>>;

/// Stream yielding `chunks` in order
#[must_use]
pub fn body_stream_from_bytes(chunks: Vec<Bytes>) -> BodyStream {
    futures::stream::iter(chunks.into_iter().map(Ok)).boxed()
}

/// Stream that ends immediately
#[must_use]
pub fn empty_body_stream() -> BodyStream {
    futures::stream::empty().boxed()
}

/// Read a stream to the end
///
/// # Errors
/// Returns the first error the stream yields
pub async fn collect_body(mut stream: BodyStream) -> GatewayResult<Bytes> {
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(body.freeze())
}

const ARCHIVE_CONTENT_TYPE: &str = "application/json";

enum Archive {
    Pending(JoinHandle<String>),
    Done(String),
}

struct Initialized {
    metadata: BodyMetadata,
    forward: Option<BodyStream>,
    archive: Archive,
}

/// Per-request three-way body tee.
///
/// Everything is lazy: the first call to any accessor runs
/// [`Self::initialize`], later calls reuse its results.
pub struct StreamingBodyHandler {
    request_id: RequestId,
    org_id: String,
    body: Option<BodyStream>,
    content_length: Option<u64>,
    storage: Option<Arc<ObjectStorageClient>>,
    metrics: MetricsClient,
    config: StreamingConfig,
    state: Option<Initialized>,
}

impl std::fmt::Debug for StreamingBodyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingBodyHandler")
            .field("request_id", &self.request_id)
            .field("org_id", &self.org_id)
            .field("content_length", &self.content_length)
            .field("archival", &self.storage.is_some())
            .field("initialized", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

impl StreamingBodyHandler {
    /// Create a handler for one request body
    #[must_use]
    pub fn new(
        request_id: RequestId,
        org_id: impl Into<String>,
        body: Option<BodyStream>,
        content_length: Option<u64>,
    ) -> Self {
        Self {
            request_id,
            org_id: org_id.into(),
            body,
            content_length,
            storage: None,
            metrics: MetricsClient::disabled(),
            config: StreamingConfig::default(),
            state: None,
        }
    }

    /// Archive the raw body through `storage`
    #[must_use]
    pub fn with_object_storage(mut self, storage: Arc<ObjectStorageClient>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Emit memory observations through `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsClient) -> Self {
        self.metrics = metrics;
        self
    }

    /// Override scan budget, branch capacity and usage accounting
    #[must_use]
    pub fn with_config(mut self, config: StreamingConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the tee and wait for metadata. Runs once.
    #[instrument(skip(self), fields(request_id = %self.request_id))]
    pub async fn initialize(&mut self) {
        if self.state.is_some() {
            return;
        }

        let Some(body) = self.body.take() else {
            debug!("No request body; skipping tee");
            self.state = Some(Initialized {
                metadata: BodyMetadata::default(),
                forward: Some(empty_body_stream()),
                archive: Archive::Done(String::new()),
            });
            return;
        };

        let [metadata_branch, archive_branch, forward] = tee(body, self.config.branch_capacity);

        let archive = match &self.storage {
            Some(storage) => Archive::Pending(self.spawn_archive(Arc::clone(storage), archive_branch)),
            None => {
                drop(archive_branch);
                Archive::Done(String::new())
            }
        };

        let mut metadata = extract_metadata(metadata_branch, self.config.metadata_scan_limit).await;
        metadata.body_size = self.content_length;

        if let Some(size) = metadata.body_size {
            self.metrics
                .track_memory(names::REQUEST_BODY_STREAM, usize::try_from(size).unwrap_or(usize::MAX));
        }

        debug!(
            model = metadata.model.as_deref().unwrap_or_default(),
            stream = ?metadata.stream,
            "Request metadata extracted"
        );

        self.state = Some(Initialized {
            metadata,
            forward: Some(forward),
            archive,
        });
    }

    fn spawn_archive(&self, storage: Arc<ObjectStorageClient>, branch: BodyStream) -> JoinHandle<String> {
        let key = ObjectStorageClient::raw_request_response_key(&self.org_id, &self.request_id);
        let content_length = self.content_length;
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let uploaded = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&uploaded);
            let counted = branch
                .inspect(move |chunk| {
                    if let Ok(chunk) = chunk {
                        counter.fetch_add(chunk.len(), Ordering::Relaxed);
                    }
                })
                .boxed();

            match storage
                .put_stream(&key, counted, content_length, ARCHIVE_CONTENT_TYPE)
                .await
            {
                Ok(url) => {
                    let bytes = uploaded.load(Ordering::Relaxed);
                    if bytes > 0 {
                        metrics.track_memory(names::S3_UPLOAD, bytes);
                    }
                    url
                }
                Err(e) => {
                    warn!(error = %e, key = %key, "Request body archival failed");
                    String::new()
                }
            }
        })
    }

    async fn state(&mut self) -> &mut Initialized {
        self.initialize().await;
        // initialize always leaves state populated
        self.state.get_or_insert_with(|| Initialized {
            metadata: BodyMetadata::default(),
            forward: None,
            archive: Archive::Done(String::new()),
        })
    }

    /// Routing metadata sniffed from the body
    pub async fn metadata(&mut self) -> &BodyMetadata {
        &self.state().await.metadata
    }

    /// Archived body URL; empty when archival is disabled or failed
    pub async fn s3_url(&mut self) -> String {
        let state = self.state().await;
        let url = match &mut state.archive {
            Archive::Done(url) => return url.clone(),
            Archive::Pending(handle) => handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "Archival task did not complete");
                String::new()
            }),
        };
        state.archive = Archive::Done(url.clone());
        url
    }

    /// The raw forward branch
    ///
    /// # Errors
    /// Returns `BodyConsumed` if the forward branch was already taken
    pub async fn take_forward_stream(&mut self) -> GatewayResult<BodyStream> {
        self.state()
            .await
            .forward
            .take()
            .ok_or(GatewayError::BodyConsumed)
    }

    /// The forward branch, with `stream_options.include_usage` spliced in
    /// when usage accounting applies to this streaming request
    ///
    /// # Errors
    /// Returns `BodyConsumed` if the forward branch was already taken
    pub async fn body_for_provider_forwarding(&mut self) -> GatewayResult<BodyStream> {
        let usage_accounting = self.config.usage_accounting;
        let state = self.state().await;
        let forward = state.forward.take().ok_or(GatewayError::BodyConsumed)?;

        let metadata = &state.metadata;
        if usage_accounting && metadata.stream == Some(true) && !metadata.includes_usage() {
            debug!("Injecting stream_options.include_usage into forwarded body");
            return Ok(StreamOptionsInjector::new(forward).boxed());
        }
        Ok(forward)
    }
}
