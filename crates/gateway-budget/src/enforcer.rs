//! Token budget enforcement.
//!
//! [`TokenBudgetEnforcer`] estimates a request body against its model's
//! context window and, when the estimate exceeds it, rewrites the body with
//! exactly one [`RemediationStrategy`]. Enforcement is synchronous and never
//! fails: anything it cannot reason about is forwarded unchanged.

use crate::estimate::TokenEstimator;
use crate::model::resolve_primary_model;
use crate::registry::{resolve_context_length, ModelRegistry};
use crate::strategy::RemediationStrategy;
use gateway_core::RequestPayload;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Outcome of enforcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    /// Forward the original bytes
    Unchanged,
    /// Forward this body instead
    Rewritten(String),
}

impl Remediation {
    /// True when the body was rewritten
    #[must_use]
    pub const fn is_rewritten(&self) -> bool {
        matches!(self, Self::Rewritten(_))
    }

    /// The rewritten body, if any
    #[must_use]
    pub fn into_body(self) -> Option<String> {
        match self {
            Self::Unchanged => None,
            Self::Rewritten(body) => Some(body),
        }
    }
}

/// One enforcement call
#[derive(Debug, Clone, Copy)]
pub struct BudgetRequest<'a> {
    /// Raw request body
    pub body: &'a str,
    /// Strategy to apply when over budget
    pub strategy: RemediationStrategy,
    /// Provider used to narrow the registry lookup
    pub provider: Option<&'a str>,
    /// Model named outside the body, e.g. by a header
    pub model_override: Option<&'a str>,
}

impl<'a> BudgetRequest<'a> {
    /// Request without provider or model override
    #[must_use]
    pub const fn new(body: &'a str, strategy: RemediationStrategy) -> Self {
        Self {
            body,
            strategy,
            provider: None,
            model_override: None,
        }
    }

    /// Narrow the registry lookup to `provider`
    #[must_use]
    pub const fn with_provider(mut self, provider: &'a str) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Model to use when the body names none
    #[must_use]
    pub const fn with_model_override(mut self, model: &'a str) -> Self {
        self.model_override = Some(model);
        self
    }
}

/// Estimate and limit for a parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetAssessment {
    /// Primary model of the chain
    pub primary_model: String,
    /// Estimated prompt tokens
    pub estimated_tokens: Option<u64>,
    /// Context window of the primary model
    pub context_length: Option<u64>,
}

impl BudgetAssessment {
    /// True only when both numbers are known and the estimate exceeds the limit
    #[must_use]
    pub fn is_over_budget(&self) -> bool {
        matches!(
            (self.estimated_tokens, self.context_length),
            (Some(estimate), Some(limit)) if estimate > limit
        )
    }
}

/// Keeps request bodies within their model's context window
#[derive(Clone)]
pub struct TokenBudgetEnforcer {
    registry: Arc<dyn ModelRegistry>,
}

impl std::fmt::Debug for TokenBudgetEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBudgetEnforcer").finish_non_exhaustive()
    }
}

impl TokenBudgetEnforcer {
    /// Create an enforcer backed by `registry`
    #[must_use]
    pub fn new(registry: Arc<dyn ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Estimate and look up the limit without rewriting anything.
    ///
    /// `None` when no primary model can be resolved.
    #[must_use]
    pub fn assess(
        &self,
        payload: &RequestPayload,
        request: &BudgetRequest<'_>,
    ) -> Option<BudgetAssessment> {
        let primary_model = resolve_primary_model(Some(payload), request.model_override)?;
        let estimator = TokenEstimator::for_model(Some(&primary_model));
        let estimated_tokens = estimator.estimate(payload);
        let context_length =
            resolve_context_length(self.registry.as_ref(), request.provider, &primary_model);

        Some(BudgetAssessment {
            primary_model,
            estimated_tokens,
            context_length,
        })
    }

    /// Enforce the budget for one request body
    #[instrument(skip_all, fields(strategy = %request.strategy))]
    pub fn enforce(&self, request: &BudgetRequest<'_>) -> Remediation {
        let Some(mut payload) = RequestPayload::parse(request.body) else {
            debug!("Body is not a recognised JSON payload, skipping budget check");
            return Remediation::Unchanged;
        };

        let Some(assessment) = self.assess(&payload, request) else {
            debug!("No model resolved, skipping budget check");
            return Remediation::Unchanged;
        };
        let (Some(estimate), Some(limit)) = (assessment.estimated_tokens, assessment.context_length)
        else {
            debug!(
                model = %assessment.primary_model,
                estimate = ?assessment.estimated_tokens,
                limit = ?assessment.context_length,
                "Budget unknown, skipping remediation"
            );
            return Remediation::Unchanged;
        };

        if estimate <= limit {
            debug!(model = %assessment.primary_model, estimate, limit, "Within budget");
            return Remediation::Unchanged;
        }

        let estimator = TokenEstimator::for_model(Some(&assessment.primary_model));
        let changed = request
            .strategy
            .apply(&mut payload, estimator, Some(estimate), Some(limit));
        if !changed {
            debug!(model = %assessment.primary_model, estimate, limit, "Strategy left body unchanged");
            return Remediation::Unchanged;
        }

        match payload.to_json_string() {
            Ok(body) => {
                debug!(
                    model = %assessment.primary_model,
                    estimate,
                    limit,
                    rewritten_estimate = ?estimator.estimate(&payload),
                    "Rewrote over-budget body"
                );
                Remediation::Rewritten(body)
            }
            Err(e) => {
                warn!(error = %e, "Failed to serialize remediated body, forwarding original");
                Remediation::Unchanged
            }
        }
    }
}
