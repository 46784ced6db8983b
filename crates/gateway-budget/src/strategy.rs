//! Remediation strategies for over-budget requests.

use crate::estimate::TokenEstimator;
use crate::middle_out::middle_out_payload;
use crate::model::apply_fallback;
use crate::normalize::truncate_payload;
use gateway_core::RequestPayload;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How an over-budget request is brought back under its model's limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemediationStrategy {
    /// Normalize text in place
    Truncate,
    /// Drop a centered window of message chunks
    MiddleOut,
    /// Switch `model` to the next entry of its fallback chain
    ModelFallback,
}

/// Strategy name that matches no known strategy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown remediation strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl RemediationStrategy {
    /// Rewrite `payload` with this strategy; returns whether it changed
    pub(crate) fn apply(
        self,
        payload: &mut RequestPayload,
        estimator: TokenEstimator,
        estimate: Option<u64>,
        limit: Option<u64>,
    ) -> bool {
        match self {
            Self::Truncate => truncate_payload(payload),
            Self::MiddleOut => match limit {
                Some(limit) => middle_out_payload(payload, estimator, limit),
                None => false,
            },
            Self::ModelFallback => apply_fallback(payload, estimate, limit),
        }
    }

    /// Canonical name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Truncate => "truncate",
            Self::MiddleOut => "middle-out",
            Self::ModelFallback => "fallback",
        }
    }
}

impl fmt::Display for RemediationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemediationStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "truncate" => Ok(Self::Truncate),
            "middle-out" | "middle_out" | "middleout" => Ok(Self::MiddleOut),
            "fallback" | "model-fallback" | "model_fallback" => Ok(Self::ModelFallback),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}
