//! Model registry access and context length resolution.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// One provider's deployment of a canonical model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelProviderConfig {
    /// Provider name, e.g. `openai`
    pub provider: String,
    /// Model id as the provider spells it
    pub provider_model_id: String,
    /// Context window in tokens, when known
    pub context_length: Option<u64>,
}

impl ModelProviderConfig {
    /// Create a config
    pub fn new(
        provider: impl Into<String>,
        provider_model_id: impl Into<String>,
        context_length: Option<u64>,
    ) -> Self {
        Self {
            provider: provider.into(),
            provider_model_id: provider_model_id.into(),
            context_length,
        }
    }
}

/// Registry lookup errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No canonical model with this id
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Provider has no models registered
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Provider does not serve this model id
    #[error("No config for '{model}' on provider '{provider}'")]
    ConfigNotFound {
        /// Provider model id
        model: String,
        /// Provider name
        provider: String,
    },
}

/// Read-only source of model deployment data
pub trait ModelRegistry: Send + Sync {
    /// Config for a provider-specific model id
    fn model_provider_config(
        &self,
        provider_model_id: &str,
        provider: &str,
    ) -> Result<ModelProviderConfig, RegistryError>;

    /// Canonical ids of every model the provider serves
    fn provider_models(&self, provider: &str) -> Result<Vec<String>, RegistryError>;

    /// Every provider config of a canonical model
    fn model_provider_configs(&self, canonical: &str)
        -> Result<Vec<ModelProviderConfig>, RegistryError>;
}

/// Registry held in memory, keyed by canonical model id
#[derive(Debug, Clone, Default)]
pub struct InMemoryModelRegistry {
    models: BTreeMap<String, Vec<ModelProviderConfig>>,
}

impl InMemoryModelRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider config under a canonical model id
    pub fn insert(&mut self, canonical: impl Into<String>, config: ModelProviderConfig) {
        self.models.entry(canonical.into()).or_default().push(config);
    }

    /// Builder form of [`Self::insert`]
    #[must_use]
    pub fn with_model(
        mut self,
        canonical: impl Into<String>,
        provider: impl Into<String>,
        provider_model_id: impl Into<String>,
        context_length: u64,
    ) -> Self {
        self.insert(
            canonical,
            ModelProviderConfig::new(provider, provider_model_id, Some(context_length)),
        );
        self
    }

    /// Number of canonical models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// True when nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ModelRegistry for InMemoryModelRegistry {
    fn model_provider_config(
        &self,
        provider_model_id: &str,
        provider: &str,
    ) -> Result<ModelProviderConfig, RegistryError> {
        self.models
            .values()
            .flatten()
            .find(|c| c.provider == provider && c.provider_model_id == provider_model_id)
            .cloned()
            .ok_or_else(|| RegistryError::ConfigNotFound {
                model: provider_model_id.to_string(),
                provider: provider.to_string(),
            })
    }

    fn provider_models(&self, provider: &str) -> Result<Vec<String>, RegistryError> {
        let models: Vec<String> = self
            .models
            .iter()
            .filter(|(_, configs)| configs.iter().any(|c| c.provider == provider))
            .map(|(canonical, _)| canonical.clone())
            .collect();

        if models.is_empty() {
            Err(RegistryError::ProviderNotFound(provider.to_string()))
        } else {
            Ok(models)
        }
    }

    fn model_provider_configs(
        &self,
        canonical: &str,
    ) -> Result<Vec<ModelProviderConfig>, RegistryError> {
        self.models
            .get(canonical)
            .cloned()
            .ok_or_else(|| RegistryError::ModelNotFound(canonical.to_string()))
    }
}

/// Context window for `model`.
///
/// With a provider, each lookup candidate is tried directly and then the
/// provider's models are scanned with [`identifier_matches`]. Without one,
/// the first config with a context length for any candidate wins. `None`
/// means the limit is unknown.
pub fn resolve_context_length(
    registry: &dyn ModelRegistry,
    provider: Option<&str>,
    model: &str,
) -> Option<u64> {
    let candidates = lookup_candidates_with_prefix_stripping(model);

    let resolved = match provider {
        Some(provider) => find_provider_config(registry, provider, model, &candidates)
            .and_then(|config| config.context_length),
        None => candidates.iter().find_map(|candidate| {
            registry
                .model_provider_configs(candidate)
                .ok()?
                .into_iter()
                .find_map(|config| config.context_length)
        }),
    };

    debug!(model, provider, context_length = ?resolved, "Resolved context length");
    resolved
}

fn find_provider_config(
    registry: &dyn ModelRegistry,
    provider: &str,
    model: &str,
    candidates: &[String],
) -> Option<ModelProviderConfig> {
    let direct = candidates
        .iter()
        .find_map(|candidate| registry.model_provider_config(candidate, provider).ok());
    if direct.is_some() {
        return direct;
    }

    registry
        .provider_models(provider)
        .ok()?
        .iter()
        .filter_map(|canonical| registry.model_provider_configs(canonical).ok())
        .flatten()
        .find(|config| {
            config.provider == provider && identifier_matches(model, &config.provider_model_id)
        })
}

/// Lookup candidates: the trimmed id, its lower-case form, then shorter
/// prefixes cut at the last `:` and then the last `-`, each in both cases.
/// Order is preserved and duplicates are dropped.
#[must_use]
pub fn lookup_candidates(model: &str) -> Vec<String> {
    let trimmed = model.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    push_unique(&mut candidates, trimmed.to_string());
    push_unique(&mut candidates, trimmed.to_lowercase());

    for delimiter in [':', '-'] {
        let mut current = trimmed;
        while let Some(index) = current.rfind(delimiter) {
            current = &current[..index];
            let prefix = current.trim();
            if prefix.is_empty() || candidates.iter().any(|c| c == prefix) {
                continue;
            }
            push_unique(&mut candidates, prefix.to_string());
            push_unique(&mut candidates, prefix.to_lowercase());
        }
    }

    candidates
}

/// [`lookup_candidates`] followed by the candidates of the part after the
/// last `/`, for ids carrying a provider prefix such as `meta-llama/...`
#[must_use]
pub fn lookup_candidates_with_prefix_stripping(model: &str) -> Vec<String> {
    let mut candidates = lookup_candidates(model);

    if let Some((_, suffix)) = model.rsplit_once('/') {
        for candidate in lookup_candidates(suffix) {
            push_unique(&mut candidates, candidate);
        }
    }

    candidates
}

fn push_unique(candidates: &mut Vec<String>, candidate: String) {
    if !candidates.contains(&candidate) {
        candidates.push(candidate);
    }
}

/// True if a request's model id refers to a provider's model id.
///
/// Ids match when any of their variants (as given, lower-case, last `:`/`/`
/// segment) are equal or one ends with the other after a `/`, `:` or `-`.
/// Failing that, the alphanumeric-only provider id must occur inside the
/// request id past its first character.
#[must_use]
pub fn identifier_matches(request_model: &str, provider_model_id: &str) -> bool {
    let request_variants = identifier_variants(request_model);
    let provider_variants = identifier_variants(provider_model_id);

    let ends_with_segment = |long: &str, short: &str| {
        long.strip_suffix(short)
            .is_some_and(|head| head.ends_with(['/', ':', '-']))
    };

    let variant_match = request_variants.iter().any(|request| {
        provider_variants.iter().any(|provider| {
            request == provider
                || ends_with_segment(request, provider)
                || ends_with_segment(provider, request)
        })
    });
    if variant_match {
        return true;
    }

    let request = sanitize_identifier(request_model);
    let provider = sanitize_identifier(provider_model_id);
    if request.is_empty() || provider.is_empty() {
        return false;
    }
    request.find(&provider).is_some_and(|index| index > 0)
}

fn identifier_variants(identifier: &str) -> Vec<String> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let lower = trimmed.to_lowercase();
    let mut variants = vec![trimmed.to_string()];
    push_unique(&mut variants, lower.clone());

    if let Some((_, last)) = lower.rsplit_once([':', '/']) {
        if !last.is_empty() {
            push_unique(&mut variants, last.to_string());
        }
    }

    variants
}

fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}
