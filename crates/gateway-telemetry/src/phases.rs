//! Per-request latency phase tracking.

use crate::metrics::{names, MetricsClient};
use std::time::{Duration, Instant};

/// Checkpoint tracker for one request.
///
/// Each checkpoint is recorded once; later calls for the same checkpoint are
/// ignored. A phase is emitted as soon as both of its ends are known.
#[derive(Debug)]
pub struct GatewayMetrics {
    client: MetricsClient,
    request_start: Instant,
    pre_request_end: Option<Instant>,
    provider_start: Option<Instant>,
    provider_end: Option<Instant>,
    provider_status: Option<u16>,
    post_request_end: Option<Instant>,
}

/// Measured phase durations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseDurations {
    /// Request start to pre-request end
    pub pre_request: Option<Duration>,
    /// Provider start to provider end
    pub provider: Option<Duration>,
    /// Provider end (or pre-request end) to post-request end
    pub post_request: Option<Duration>,
    /// Request start to post-request end
    pub total: Option<Duration>,
}

impl GatewayMetrics {
    /// Start tracking a request now
    #[must_use]
    pub fn start(client: MetricsClient) -> Self {
        Self {
            client,
            request_start: Instant::now(),
            pre_request_end: None,
            provider_start: None,
            provider_end: None,
            provider_status: None,
            post_request_end: None,
        }
    }

    /// The outbound request is ready
    pub fn mark_pre_request_end(&mut self) {
        if self.pre_request_end.is_some() {
            return;
        }
        let now = Instant::now();
        self.pre_request_end = Some(now);
        self.emit(names::PRE_REQUEST_MS, now - self.request_start);
    }

    /// The outbound call has been issued
    pub fn mark_provider_start(&mut self) {
        if self.provider_start.is_none() {
            self.provider_start = Some(Instant::now());
        }
    }

    /// The provider responded with `status`
    pub fn mark_provider_end(&mut self, status: u16) {
        if self.provider_end.is_some() {
            return;
        }
        let now = Instant::now();
        self.provider_end = Some(now);
        self.provider_status = Some(status);
        if let Some(start) = self.provider_start {
            self.emit(names::PROVIDER_MS, now - start);
        }
    }

    /// Response post-processing finished
    pub fn mark_post_request_end(&mut self) {
        if self.post_request_end.is_some() {
            return;
        }
        let now = Instant::now();
        self.post_request_end = Some(now);
        if let Some(from) = self.provider_end.or(self.pre_request_end) {
            self.emit(names::POST_REQUEST_MS, now - from);
        }
        self.emit(names::TOTAL_MS, now - self.request_start);
    }

    /// Status recorded by [`Self::mark_provider_end`]
    #[must_use]
    pub const fn provider_status(&self) -> Option<u16> {
        self.provider_status
    }

    /// Durations measured so far
    #[must_use]
    pub fn phases(&self) -> PhaseDurations {
        PhaseDurations {
            pre_request: self.pre_request_end.map(|end| end - self.request_start),
            provider: self
                .provider_start
                .zip(self.provider_end)
                .map(|(start, end)| end - start),
            post_request: self
                .post_request_end
                .zip(self.provider_end.or(self.pre_request_end))
                .map(|(end, from)| end - from),
            total: self.post_request_end.map(|end| end - self.request_start),
        }
    }

    fn emit(&self, name: &str, elapsed: Duration) {
        self.client
            .distribution(name, elapsed.as_secs_f64() * 1000.0);
    }
}
