//! # Gateway Budget
//!
//! Context-window enforcement for the LLM Edge Gateway.
//!
//! This crate provides:
//! - Character-based token estimation with per-model heuristics
//! - Context length resolution against a [`ModelRegistry`]
//! - Three remediation strategies: truncate, middle-out and model fallback
//! - [`TokenBudgetEnforcer`], which picks exactly one of them per request

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod enforcer;
pub mod estimate;
pub mod middle_out;
pub mod model;
pub mod normalize;
pub mod registry;
pub mod strategy;

// Re-export main types
pub use enforcer::{BudgetAssessment, BudgetRequest, Remediation, TokenBudgetEnforcer};
pub use estimate::{payload_text, tools_text, TokenEstimator, DEFAULT_TOKEN_HEURISTIC};
pub use middle_out::{middle_out, split_text, Trimmable, CHUNK_SIZE};
pub use model::{resolve_primary_model, ModelChain};
pub use normalize::normalize_text;
pub use registry::{
    resolve_context_length, InMemoryModelRegistry, ModelProviderConfig, ModelRegistry,
    RegistryError,
};
pub use strategy::{RemediationStrategy, UnknownStrategy};
