//! Configuration types.
//!
//! Two independent YAML documents — a model catalog and a provider roster —
//! are deserialized and cross-validated before [`crate::Router::build`]
//! returns, a "parse then validate, fail loudly" posture. Secrets (API keys)
//! never live in either document; they arrive through
//! [`ProviderConnectionOptions`] instead, mirroring a `key_env`-indirection
//! pattern for client keys.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{
    Catalog, GenericAliasConfig, ModelDescriptor, ProviderDescriptor, ProviderModelRecord,
    RateLimits,
};
use crate::error::RouterError;

/// `models.yaml` — the canonical model catalog, independent of any provider.
///
/// ```yaml
/// models:
///   - id: llama-3.3-70b
///     tier: 3
///     family: llama
///     aliases: [llama-70b]
/// aliases:
///   fast: llama-3.3-70b
/// generic_aliases:
///   best-large:
///     tier: 3
///   best:
///     min_tier: 1
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelsBundle {
    pub models: Vec<ModelEntry>,
    /// User-defined aliases, layered on top of each model's built-in
    /// `aliases` list. Takes precedence on conflict.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub generic_aliases: HashMap<String, GenericAliasEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub tier: u8,
    pub family: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Exactly one of `tier` / `min_tier` must be set; `ModelsBundle::into_catalog_inputs`
/// rejects entries with both or neither.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenericAliasEntry {
    #[serde(default)]
    pub tier: Option<u8>,
    #[serde(default)]
    pub min_tier: Option<u8>,
}

/// `providers.yaml` — the provider roster and their model bindings.
/// Contains no secrets; API keys are supplied via [`ProviderConnectionOptions`].
///
/// ```yaml
/// providers:
///   - name: groq
///     display_name: Groq
///     base_url: https://api.groq.com/openai/v1
///     default_limits:
///       requests_per_minute: 30
///     models:
///       - canonical_id: llama-3.3-70b
///         provider_model_id: llama-3.3-70b-versatile
///         limits:
///           requests_per_minute: 20
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersBundle {
    pub providers: Vec<ProviderEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEntry {
    pub name: String,
    pub display_name: String,
    pub base_url: String,
    #[serde(default)]
    pub default_limits: RateLimits,
    pub models: Vec<ProviderModelEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderModelEntry {
    pub canonical_id: String,
    pub provider_model_id: String,
    #[serde(default)]
    pub limits: RateLimits,
}

/// Construction-time overlay for one provider: secrets and per-process
/// behavior that has no business living in a checked-in YAML file.
#[derive(Debug, Clone)]
pub struct ProviderConnectionOptions {
    /// Must match a [`ProviderEntry::name`] in the providers bundle.
    pub name: String,
    pub api_key: Option<String>,
    /// Lower sorts first under the Priority strategy. Defaults to the
    /// provider's position in `providers.yaml` when not supplied.
    pub priority: Option<u32>,
    pub enabled: bool,
    pub is_free_credits: bool,
    /// Override `base_url` from the bundle, e.g. to point at a proxy.
    pub base_url_override: Option<String>,
}

impl Default for ProviderConnectionOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            api_key: None,
            priority: None,
            enabled: true,
            is_free_credits: false,
            base_url_override: None,
        }
    }
}

/// Resolve a [`ModelsBundle`] + [`ProvidersBundle`] + per-provider connection
/// options into an immutable [`Catalog`], validating every cross-reference.
pub fn build_catalog(
    models: ModelsBundle,
    providers: ProvidersBundle,
    connections: &[ProviderConnectionOptions],
) -> Result<Catalog, RouterError> {
    let model_descriptors = models
        .models
        .into_iter()
        .map(|m| ModelDescriptor {
            canonical_id: m.id,
            tier: m.tier,
            family: m.family,
            aliases: m.aliases.into_iter().map(|a| a.to_lowercase()).collect(),
        })
        .collect();

    let mut generic_aliases = HashMap::new();
    for (name, entry) in models.generic_aliases {
        let config = match (entry.tier, entry.min_tier) {
            (Some(t), None) => GenericAliasConfig::ExactTier(t),
            (None, Some(t)) => GenericAliasConfig::MinTier(t),
            _ => {
                return Err(RouterError::Configuration(format!(
                    "generic alias `{name}` must set exactly one of `tier` or `min_tier`"
                )))
            }
        };
        generic_aliases.insert(name, config);
    }

    let mut by_name: HashMap<&str, &ProviderConnectionOptions> =
        HashMap::with_capacity(connections.len());
    for c in connections {
        by_name.insert(c.name.as_str(), c);
    }

    let mut provider_descriptors = Vec::with_capacity(providers.providers.len());
    for (index, entry) in providers.providers.into_iter().enumerate() {
        let conn = by_name.get(entry.name.as_str());

        let provider_models = entry
            .models
            .into_iter()
            .map(|pm| ProviderModelRecord {
                canonical_id: pm.canonical_id,
                provider_model_id: pm.provider_model_id,
                limits: entry.default_limits.overlay(&pm.limits),
            })
            .collect();

        provider_descriptors.push(ProviderDescriptor {
            name: entry.name.as_str().into(),
            display_name: entry.display_name,
            base_url: conn
                .and_then(|c| c.base_url_override.clone())
                .unwrap_or(entry.base_url),
            api_key: conn.and_then(|c| c.api_key.clone()),
            priority: conn
                .and_then(|c| c.priority)
                .unwrap_or(index as u32),
            enabled: conn.map(|c| c.enabled).unwrap_or(true),
            is_free_credits: conn.map(|c| c.is_free_credits).unwrap_or(false),
            models: provider_models,
        });
    }

    Catalog::new(
        model_descriptors,
        models.aliases,
        generic_aliases,
        provider_descriptors,
    )
}

/// Tunable knobs for a [`crate::Router`], independent of the model/provider
/// catalog.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Maximum number of retries after the first attempt, across all
    /// providers, before a `route` call gives up. Total upstream attempts
    /// per call is `max_retries + 1`.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// If true, exhausting every candidate raises
    /// [`RouterError::AllProvidersExhausted`]; otherwise the driver returns
    /// the last observed error.
    pub throw_on_exhausted: bool,
    /// Provider names excluded from selection for the lifetime of the router
    /// (distinct from a cooldown, which is time-bounded).
    pub excluded_providers: Vec<String>,
    pub track_latency: bool,
    pub latency_sample_cap: usize,
    pub latency_decay: f64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            throw_on_exhausted: true,
            excluded_providers: Vec::new(),
            track_latency: true,
            latency_sample_cap: 100,
            latency_decay: 0.8,
        }
    }
}
