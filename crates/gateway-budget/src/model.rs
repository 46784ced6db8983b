//! Model fallback chains and the model-fallback strategy.

use gateway_core::RequestPayload;

/// A `model` field split on commas.
///
/// The first entry is the primary model, the second the designated fallback.
/// A single-entry chain is its own fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelChain {
    entries: Vec<String>,
}

impl ModelChain {
    /// Split a `model` field, dropping blank entries
    #[must_use]
    pub fn parse(field: &str) -> Self {
        let entries = field
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(String::from)
            .collect();
        Self { entries }
    }

    /// All entries in order
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// True when the field held no usable entry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry
    #[must_use]
    pub fn primary(&self) -> Option<&str> {
        self.entries.first().map(String::as_str)
    }

    /// Second entry, or the first for a singleton chain
    #[must_use]
    pub fn fallback(&self) -> Option<&str> {
        self.entries
            .get(1)
            .or_else(|| self.entries.first())
            .map(String::as_str)
    }
}

/// Primary model for budgeting: the body's chain wins over a header override
#[must_use]
pub fn resolve_primary_model(
    payload: Option<&RequestPayload>,
    header_override: Option<&str>,
) -> Option<String> {
    let from_body = payload
        .and_then(RequestPayload::model_field)
        .map(ModelChain::parse)
        .and_then(|chain| chain.primary().map(String::from));

    from_body.or_else(|| {
        header_override
            .map(ModelChain::parse)
            .and_then(|chain| chain.primary().map(String::from))
    })
}

/// Point `model` at the fallback entry when `estimate` exceeds `limit`, or
/// when either is unknown; otherwise pin it to the primary entry.
///
/// Returns whether the field changed. Payloads without a usable `model`
/// field are left alone.
pub fn apply_fallback(
    payload: &mut RequestPayload,
    estimate: Option<u64>,
    limit: Option<u64>,
) -> bool {
    let Some(chain) = payload.model_field().map(ModelChain::parse) else {
        return false;
    };

    let target = match (estimate, limit) {
        (Some(estimate), Some(limit)) if estimate <= limit => chain.primary(),
        _ => chain.fallback(),
    };
    let Some(target) = target else {
        return false;
    };

    let changed = payload.model_field() != Some(target);
    if changed {
        payload.set_model(target);
    }
    changed
}
