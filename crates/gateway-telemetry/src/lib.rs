//! # Gateway Telemetry
//!
//! Observability for the LLM Edge Gateway.
//!
//! This crate provides:
//! - A passed-down [`MetricsClient`] handle with a strict metric allow-list
//! - A Prometheus-backed [`MetricsSink`]
//! - [`GatewayMetrics`], the per-request latency phase tracker
//! - Structured logging setup

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod metrics;
pub mod phases;
pub mod tracing_setup;

// Re-export main types
pub use metrics::{names, InMemorySink, MetricsClient, MetricsError, MetricsSink, PrometheusSink};
pub use phases::{GatewayMetrics, PhaseDurations};
pub use tracing_setup::{init_tracing, TracingConfig, TracingError};
