//! Model catalog.
//!
//! Canonical model ids, user and built-in aliases, generic tier tokens
//! (`best`, `best-large`, `70b`, …), and the provider-specific id + rate
//! limits each provider binds a canonical id to. Loaded once at
//! [`crate::Router::build`] time from a [`crate::config::ModelsBundle`] +
//! [`crate::config::ProvidersBundle`] pair and immutable thereafter — the
//! same "validate once, crash loudly on error" posture as
//! `Config::load` → `validate()`.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RouterError;

/// A provider's identifying name, e.g. `"groq"`, `"openai-prod"`.
///
/// Kept as an owned newtype rather than a closed enum because the set of
/// providers is entirely operator-configured — two routers in the same
/// process may have completely different provider rosters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderName(String);

impl ProviderName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProviderName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Optional per-(metric, window) request/token caps. `None` means "no limit
/// enforced" for that metric — not "zero".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default)]
    pub requests_per_minute: Option<u64>,
    #[serde(default)]
    pub requests_per_hour: Option<u64>,
    #[serde(default)]
    pub requests_per_day: Option<u64>,
    #[serde(default)]
    pub tokens_per_minute: Option<u64>,
    #[serde(default)]
    pub tokens_per_hour: Option<u64>,
    #[serde(default)]
    pub tokens_per_day: Option<u64>,
}

impl RateLimits {
    pub fn requests_for(&self, kind: crate::window::WindowKind) -> Option<u64> {
        use crate::window::WindowKind::*;
        match kind {
            Minute => self.requests_per_minute,
            Hour => self.requests_per_hour,
            Day => self.requests_per_day,
        }
    }

    pub fn tokens_for(&self, kind: crate::window::WindowKind) -> Option<u64> {
        use crate::window::WindowKind::*;
        match kind {
            Minute => self.tokens_per_minute,
            Hour => self.tokens_per_hour,
            Day => self.tokens_per_day,
        }
    }

    /// Overlay `self` (provider defaults) with `override_`'s present fields,
    /// field by field: a per-model limit overrides the provider default only
    /// where it's actually set.
    pub fn overlay(&self, override_: &RateLimits) -> RateLimits {
        RateLimits {
            requests_per_minute: override_.requests_per_minute.or(self.requests_per_minute),
            requests_per_hour: override_.requests_per_hour.or(self.requests_per_hour),
            requests_per_day: override_.requests_per_day.or(self.requests_per_day),
            tokens_per_minute: override_.tokens_per_minute.or(self.tokens_per_minute),
            tokens_per_hour: override_.tokens_per_hour.or(self.tokens_per_hour),
            tokens_per_day: override_.tokens_per_day.or(self.tokens_per_day),
        }
    }
}

/// A canonical model's static description. Immutable after load.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub canonical_id: String,
    /// 1..5, higher = more capable.
    pub tier: u8,
    pub family: String,
    /// Lower-cased alias strings; lookups are case-insensitive.
    pub aliases: HashSet<String>,
}

/// A generic tier token like `best-large` or `32b`: resolves to a tier
/// predicate rather than a single canonical id. Exactly one of `tier` /
/// `min_tier` is set.
#[derive(Debug, Clone, Copy)]
pub enum GenericAliasConfig {
    ExactTier(u8),
    MinTier(u8),
}

/// A canonical id bound to one provider's wire-level model id, with that
/// provider's effective (already-overlaid) rate limits.
#[derive(Debug, Clone)]
pub struct ProviderModelRecord {
    pub canonical_id: String,
    pub provider_model_id: String,
    pub limits: RateLimits,
}

/// A configured upstream provider. Immutable after load.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: ProviderName,
    pub display_name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Lower number = higher precedence for the Priority strategy.
    pub priority: u32,
    pub enabled: bool,
    pub is_free_credits: bool,
    pub models: Vec<ProviderModelRecord>,
}

impl ProviderDescriptor {
    pub fn model(&self, canonical_id: &str) -> Option<&ProviderModelRecord> {
        self.models.iter().find(|m| m.canonical_id == canonical_id)
    }
}

/// What [`Catalog::resolve`] produced for a model token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Canonical(String),
    Generic(String),
    /// No alias or built-in mapping matched; the caller's input is returned
    /// unchanged so that selection fails with a clear `ModelNotFound` rather
    /// than silently substituting something else.
    Unresolved(String),
}

/// The immutable, validated model/provider catalog.
#[derive(Debug)]
pub struct Catalog {
    models: HashMap<String, ModelDescriptor>,
    /// lower-cased alias → canonical id
    alias_to_canonical: HashMap<String, String>,
    generic_aliases: HashMap<String, GenericAliasConfig>,
    providers: Vec<ProviderDescriptor>,
}

impl Catalog {
    pub fn new(
        models: Vec<ModelDescriptor>,
        user_aliases: HashMap<String, String>,
        generic_aliases: HashMap<String, GenericAliasConfig>,
        providers: Vec<ProviderDescriptor>,
    ) -> Result<Self, RouterError> {
        let mut by_id = HashMap::new();
        for m in models {
            by_id.insert(m.canonical_id.clone(), m);
        }

        // Built-in alias map is derived from each model's declared aliases;
        // user-supplied aliases take precedence.
        let mut alias_to_canonical: HashMap<String, String> = HashMap::new();
        for model in by_id.values() {
            for alias in &model.aliases {
                alias_to_canonical.insert(alias.to_lowercase(), model.canonical_id.clone());
            }
        }
        for (alias, canonical) in &user_aliases {
            if !by_id.contains_key(canonical) {
                return Err(RouterError::Configuration(format!(
                    "alias `{alias}` references unknown canonical id `{canonical}`"
                )));
            }
            alias_to_canonical.insert(alias.to_lowercase(), canonical.clone());
        }

        for provider in &providers {
            for pm in &provider.models {
                if !by_id.contains_key(&pm.canonical_id) {
                    return Err(RouterError::Configuration(format!(
                        "provider `{}` model record references unknown canonical id `{}`",
                        provider.name, pm.canonical_id
                    )));
                }
            }
        }

        if providers.is_empty() {
            return Err(RouterError::Configuration(
                "provider list must not be empty".into(),
            ));
        }

        Ok(Self {
            models: by_id,
            alias_to_canonical,
            generic_aliases,
            providers,
        })
    }

    pub fn providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    pub fn provider(&self, name: &ProviderName) -> Option<&ProviderDescriptor> {
        self.providers.iter().find(|p| &p.name == name)
    }

    pub fn model_descriptor(&self, canonical_id: &str) -> Option<&ModelDescriptor> {
        self.models.get(canonical_id)
    }

    /// Resolve a model token: user aliases, then built-in aliases (both
    /// folded into `alias_to_canonical`, user entries taking precedence on
    /// conflict), then generic tokens, then passthrough. Matching is
    /// case-insensitive on the whole token. A user alias that happens to
    /// share a name with a generic token always wins — generic tokens are
    /// checked last.
    pub fn resolve(&self, name: &str) -> Resolution {
        let lower = name.to_lowercase();
        if let Some(canonical) = self.alias_to_canonical.get(&lower) {
            return Resolution::Canonical(canonical.clone());
        }
        if self.generic_aliases.contains_key(&lower) {
            return Resolution::Generic(lower);
        }
        if self.models.contains_key(name) {
            return Resolution::Canonical(name.to_string());
        }
        Resolution::Unresolved(name.to_string())
    }

    pub fn is_generic(&self, name: &str) -> bool {
        self.generic_aliases.contains_key(&name.to_lowercase())
    }

    pub fn generic_config(&self, name: &str) -> Option<GenericAliasConfig> {
        self.generic_aliases.get(&name.to_lowercase()).copied()
    }

    /// Every (provider, provider-model-record)
    /// pair that binds `canonical_id`, restricted to enabled providers.
    pub fn providers_supporting(
        &self,
        canonical_id: &str,
    ) -> Vec<(&ProviderDescriptor, &ProviderModelRecord)> {
        self.providers
            .iter()
            .filter(|p| p.enabled)
            .filter_map(|p| p.model(canonical_id).map(|m| (p, m)))
            .collect()
    }

    /// Every (provider, provider-model-record)
    /// pair whose canonical id's tier satisfies the predicate.
    pub fn providers_matching_generic(
        &self,
        config: GenericAliasConfig,
    ) -> Vec<(&ProviderDescriptor, &ProviderModelRecord)> {
        self.providers
            .iter()
            .filter(|p| p.enabled)
            .flat_map(|p| p.models.iter().map(move |m| (p, m)))
            .filter(|(_, m)| {
                let Some(descriptor) = self.models.get(&m.canonical_id) else {
                    return false;
                };
                match config {
                    GenericAliasConfig::ExactTier(t) => descriptor.tier == t,
                    GenericAliasConfig::MinTier(t) => descriptor.tier >= t,
                }
            })
            .collect()
    }

    pub fn tier_of(&self, canonical_id: &str) -> Option<u8> {
        self.models.get(canonical_id).map(|m| m.tier)
    }
}
