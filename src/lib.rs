//! # LLM Edge Gateway
//!
//! Request body pipeline for the edge of an LLM gateway.
//!
//! This crate provides:
//! - [`EdgePipeline`]: per-process wiring of buffers, archival, token budget
//!   enforcement and latency metrics
//! - [`PreparedRequest`]: one request's body, ready to forward
//! - [`init_logging`]: subscriber setup from [`LoggingConfig`]
//!
//! ## Usage
//!
//! ```no_run
//! use llm_edge_gateway::{EdgePipeline, EdgeRequest};
//! use gateway_body::body_stream_from_bytes;
//! use gateway_budget::{InMemoryModelRegistry, RemediationStrategy};
//! use gateway_config::EdgeConfig;
//! use std::sync::Arc;
//!
//! # async fn run() -> gateway_core::GatewayResult<()> {
//! let config = EdgeConfig::load(None)?;
//! let registry = InMemoryModelRegistry::new().with_model("gpt-4", "openai", "gpt-4", 8192);
//! let pipeline = EdgePipeline::new(config, Arc::new(registry))?;
//!
//! let body = body_stream_from_bytes(vec![r#"{"model":"gpt-4","messages":[]}"#.into()]);
//! let request = EdgeRequest::new("org-1", body).with_remediation(RemediationStrategy::MiddleOut);
//! let mut prepared = pipeline.prepare(request).await?;
//! let _forward = prepared.body_for_provider()?;
//! prepared.provider_started();
//! prepared.provider_finished(200);
//! let _completed = prepared.finish().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use gateway_body::{
    BodyBuffer, BodyMetadata, BodyStream, BufferRequirements, BufferStrategy, ContainerRouter,
    InMemoryBuffer, ObjectStorageClient, RemoteBuffer, StreamingBodyHandler,
};
use gateway_budget::{BudgetRequest, ModelRegistry, Remediation, RemediationStrategy, TokenBudgetEnforcer};
use gateway_config::{EdgeConfig, LogFormat, LoggingConfig};
use gateway_core::{GatewayError, GatewayResult, RequestId};
use gateway_telemetry::{
    init_tracing, GatewayMetrics, MetricsClient, PhaseDurations, PrometheusSink, TracingConfig,
    TracingError,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Service name reported in logs
pub const SERVICE_NAME: &str = "llm-edge-gateway";

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Errors
/// Returns error if a global subscriber is already installed
pub fn init_logging(config: &LoggingConfig) -> Result<(), TracingError> {
    let tracing_config = TracingConfig::new(SERVICE_NAME)
        .with_log_level(config.level.clone())
        .with_json(config.format == LogFormat::Json);
    init_tracing(&tracing_config)
}

/// One inbound request as seen by the pipeline
pub struct EdgeRequest {
    /// Request identifier; also selects the remote shard
    pub request_id: RequestId,
    /// Organization the archived body is filed under
    pub org_id: String,
    /// Inbound body
    pub body: BodyStream,
    /// `Content-Length`, when the client sent one
    pub content_length: Option<u64>,
    /// Capabilities the request path needs from its body
    pub requirements: BufferRequirements,
    /// Strategy used when the body exceeds its model's context window
    pub remediation: Option<RemediationStrategy>,
    /// Provider used to narrow the context length lookup
    pub provider: Option<String>,
    /// Model named by a header, used when the body names none
    pub model_override: Option<String>,
}

impl std::fmt::Debug for EdgeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeRequest")
            .field("request_id", &self.request_id)
            .field("org_id", &self.org_id)
            .field("content_length", &self.content_length)
            .field("requirements", &self.requirements)
            .field("remediation", &self.remediation)
            .field("provider", &self.provider)
            .field("model_override", &self.model_override)
            .finish_non_exhaustive()
    }
}

impl EdgeRequest {
    /// Request with a generated id and no extra requirements
    #[must_use]
    pub fn new(org_id: impl Into<String>, body: BodyStream) -> Self {
        Self {
            request_id: RequestId::generate(),
            org_id: org_id.into(),
            body,
            content_length: None,
            requirements: BufferRequirements::default(),
            remediation: None,
            provider: None,
            model_override: None,
        }
    }

    /// Use a known request id
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Set the declared body length
    #[must_use]
    pub const fn with_content_length(mut self, content_length: u64) -> Self {
        self.content_length = Some(content_length);
        self
    }

    /// Set the body requirements
    #[must_use]
    pub const fn with_requirements(mut self, requirements: BufferRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Enforce the token budget with `strategy`
    #[must_use]
    pub const fn with_remediation(mut self, strategy: RemediationStrategy) -> Self {
        self.remediation = Some(strategy);
        self
    }

    /// Narrow the context length lookup to `provider`
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Model to budget against when the body names none
    #[must_use]
    pub fn with_model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    /// Requirements including those implied by remediation
    #[must_use]
    pub const fn effective_requirements(&self) -> BufferRequirements {
        if self.remediation.is_some() {
            self.requirements.with_token_budget()
        } else {
            self.requirements
        }
    }
}

/// Shared, per-process pipeline state
pub struct EdgePipeline {
    config: EdgeConfig,
    metrics: MetricsClient,
    router: Option<ContainerRouter>,
    storage: Option<Arc<ObjectStorageClient>>,
    http: reqwest::Client,
    enforcer: TokenBudgetEnforcer,
}

impl std::fmt::Debug for EdgePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgePipeline")
            .field("remote_available", &self.router.is_some())
            .field("archival", &self.storage.is_some())
            .field("metrics", &self.metrics.is_enabled())
            .finish_non_exhaustive()
    }
}

impl EdgePipeline {
    /// Build the pipeline from configuration.
    ///
    /// Metrics go to a fresh [`PrometheusSink`] when enabled.
    ///
    /// # Errors
    /// Returns `Configuration` for an invalid shard pool, storage endpoint,
    /// HTTP client or metrics registry
    pub fn new(config: EdgeConfig, registry: Arc<dyn ModelRegistry>) -> GatewayResult<Self> {
        let metrics = if config.metrics.enabled {
            let sink = PrometheusSink::new().map_err(|e| GatewayError::configuration(e.to_string()))?;
            MetricsClient::new(Arc::new(sink), config.metrics.sample_rate)
        } else {
            MetricsClient::disabled()
        };

        let router = if config.remote_buffer.is_enabled() {
            Some(ContainerRouter::new(config.remote_buffer.endpoints.clone())?)
        } else {
            None
        };

        let storage = config
            .object_storage
            .as_ref()
            .map(ObjectStorageClient::new)
            .transpose()?
            .map(Arc::new);

        let http = reqwest::Client::builder()
            .timeout(config.remote_buffer.timeout)
            .build()
            .map_err(|e| GatewayError::configuration(format!("HTTP client: {e}")))?;

        info!(
            remote_shards = router.as_ref().map_or(0, ContainerRouter::pool_size),
            archival = storage.is_some(),
            metrics = metrics.is_enabled(),
            "Edge pipeline initialized"
        );

        Ok(Self {
            config,
            metrics,
            router,
            storage,
            http,
            enforcer: TokenBudgetEnforcer::new(registry),
        })
    }

    /// Emit metrics through `metrics` instead
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsClient) -> Self {
        self.metrics = metrics;
        self
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// Metrics handle shared by every request
    #[must_use]
    pub const fn metrics(&self) -> &MetricsClient {
        &self.metrics
    }

    /// Token budget enforcer
    #[must_use]
    pub const fn enforcer(&self) -> &TokenBudgetEnforcer {
        &self.enforcer
    }

    /// Buffer strategy for a request with `requirements`
    #[must_use]
    pub const fn select_strategy(&self, requirements: BufferRequirements) -> BufferStrategy {
        BufferStrategy::select(requirements, self.router.is_some())
    }

    /// Take ownership of a request body and make it ready to forward.
    ///
    /// The body is teed for metadata and archival, held in memory or parked on
    /// a remote shard, and rewritten when it exceeds its token budget.
    ///
    /// # Errors
    /// Returns the first error of the inbound stream on the in-memory path
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn prepare(&self, request: EdgeRequest) -> GatewayResult<PreparedRequest> {
        let phases = GatewayMetrics::start(self.metrics.clone());
        let requirements = request.effective_requirements();
        let strategy = self.select_strategy(requirements);
        debug!(%strategy, ?requirements, "Selected buffer strategy");

        let mut handler = StreamingBodyHandler::new(
            request.request_id.clone(),
            request.org_id,
            Some(request.body),
            request.content_length,
        )
        .with_metrics(self.metrics.clone())
        .with_config(self.config.streaming.clone());
        if let Some(storage) = &self.storage {
            handler = handler.with_object_storage(Arc::clone(storage));
        }

        let metadata = handler.metadata().await.clone();
        let forward = handler.body_for_provider_forwarding().await?;

        let (buffer, remediation) = match (strategy, &self.router) {
            (BufferStrategy::Remote, Some(router)) => {
                let buffer = RemoteBuffer::spawn(
                    request.request_id.clone(),
                    forward,
                    router,
                    self.http.clone(),
                    self.metrics.clone(),
                    self.config.streaming.branch_capacity,
                )
                .with_metadata(metadata.clone());
                (BodyBuffer::from(buffer), Remediation::Unchanged)
            }
            _ => {
                let mut buffer = InMemoryBuffer::from_stream(forward).await?;
                if let Some(storage) = &self.config.object_storage {
                    buffer = buffer.with_object_storage(storage.clone());
                }
                let remediation = match request.remediation {
                    Some(strategy) => self.remediate(
                        &mut buffer,
                        strategy,
                        request.provider.as_deref(),
                        request.model_override.as_deref(),
                    ),
                    None => Remediation::Unchanged,
                };
                (BodyBuffer::from(buffer), remediation)
            }
        };

        Ok(PreparedRequest {
            request_id: request.request_id,
            buffer,
            handler,
            metadata,
            rewritten: remediation.is_rewritten(),
            phases,
        })
    }

    fn remediate(
        &self,
        buffer: &mut InMemoryBuffer,
        strategy: RemediationStrategy,
        provider: Option<&str>,
        model_override: Option<&str>,
    ) -> Remediation {
        let body = match buffer.unsafe_get_raw_text() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Body is not readable as text, skipping budget check");
                return Remediation::Unchanged;
            }
        };

        let mut budget = BudgetRequest::new(&body, strategy);
        budget.provider = provider;
        budget.model_override = model_override;

        let remediation = self.enforcer.enforce(&budget);
        if let Remediation::Rewritten(rewritten) = &remediation {
            if let Err(e) = buffer.temp_set_body(rewritten.clone()) {
                warn!(error = %e, "Failed to store remediated body, forwarding original");
                return Remediation::Unchanged;
            }
        }
        remediation
    }
}

/// A request whose body is ready to forward
#[derive(Debug)]
pub struct PreparedRequest {
    request_id: RequestId,
    buffer: BodyBuffer,
    handler: StreamingBodyHandler,
    metadata: BodyMetadata,
    rewritten: bool,
    phases: GatewayMetrics,
}

/// What a finished request leaves behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRequest {
    /// Archived body URL; empty when archival is disabled or failed
    pub s3_url: String,
    /// Measured latency phases
    pub phases: PhaseDurations,
}

impl PreparedRequest {
    /// Request identifier
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Strategy the body is held with
    #[must_use]
    pub const fn strategy(&self) -> BufferStrategy {
        self.buffer.strategy()
    }

    /// Metadata sniffed from the body prefix
    #[must_use]
    pub const fn metadata(&self) -> &BodyMetadata {
        &self.metadata
    }

    /// True when token budget enforcement rewrote the body
    #[must_use]
    pub const fn was_rewritten(&self) -> bool {
        self.rewritten
    }

    /// The body owner
    #[must_use]
    pub const fn buffer(&self) -> &BodyBuffer {
        &self.buffer
    }

    /// Mutable access to the body owner
    pub fn buffer_mut(&mut self) -> &mut BodyBuffer {
        &mut self.buffer
    }

    /// Body to send upstream; ends the pre-request phase
    ///
    /// # Errors
    /// `BodyConsumed` if a remote forward stream was already taken
    pub fn body_for_provider(&mut self) -> GatewayResult<BodyStream> {
        let body = self.buffer.readable_stream_to_body()?;
        self.phases.mark_pre_request_end();
        Ok(body)
    }

    /// The outbound call has been issued
    pub fn provider_started(&mut self) {
        self.phases.mark_provider_start();
    }

    /// The provider answered with `status`
    pub fn provider_finished(&mut self, status: u16) {
        self.phases.mark_provider_end(status);
    }

    /// Close out the request: release the body, wait for archival and emit
    /// the remaining phases.
    ///
    /// The body goes first; an unread forward branch would otherwise hold
    /// back the shared reader and the archive with it.
    pub async fn finish(mut self) -> CompletedRequest {
        self.buffer.delete();
        let s3_url = self.handler.s3_url().await;
        self.phases.mark_post_request_end();
        CompletedRequest {
            s3_url,
            phases: self.phases.phases(),
        }
    }
}
