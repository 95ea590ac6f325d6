//! Candidate selection.
//!
//! Turns "route this model" into the ordered set of (provider, provider
//! model) pairs a [`crate::strategy::RoutingStrategy`] is allowed to pick
//! from: resolve the requested name, gather every provider binding it (or
//! matching its generic tier predicate), drop anything excluded or cooling
//! down, attach live quota/latency, then sort by tier so the strategy only
//! ever sees candidates from the best tier actually available.

use chrono::{DateTime, Utc};

use crate::catalog::{Catalog, ProviderName, Resolution};
use crate::tracker::{QuotaStatus, RateLimitTracker};

/// Failure modes specific to the selection pipeline. Wrapped into
/// [`crate::error::RouterError`] at the crate boundary.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("model `{model}` does not match any known model, alias, or generic tier token")]
    UnknownModel { model: String },

    #[error("no enabled provider binds model `{model}`")]
    NoCandidates { model: String },

    #[error("every candidate for `{model}` is excluded or in cooldown")]
    AllExcluded { model: String },

    #[error("provider `{name}` is not registered in this catalog")]
    ProviderNotFound { name: String },

    #[error("routing strategy failed: {0}")]
    StrategyError(String),
}

/// One provider's binding for a resolved model, enriched with live
/// rate-limit and latency state.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: ProviderName,
    pub provider_model_id: String,
    pub canonical_id: String,
    pub tier: u8,
    pub priority: u32,
    pub is_free_credits: bool,
    pub quota: QuotaStatus,
    pub latency_ms: Option<f64>,
}

/// Run the full selection pipeline for `requested_model`, returning
/// candidates sorted by tier descending (ties broken by configured
/// priority ascending). Excludes providers in `excluded_providers` and any
/// (provider, model) pair currently in cooldown.
pub async fn select_candidates(
    catalog: &Catalog,
    tracker: &RateLimitTracker,
    requested_model: &str,
    excluded_providers: &[String],
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>, SelectionError> {
    let resolution = catalog.resolve(requested_model);

    let raw: Vec<(&crate::catalog::ProviderDescriptor, &crate::catalog::ProviderModelRecord)> =
        match &resolution {
            Resolution::Canonical(id) => catalog.providers_supporting(id),
            Resolution::Generic(name) => {
                let config = catalog
                    .generic_config(name)
                    .expect("generic name came from catalog.resolve, must have a config");
                catalog.providers_matching_generic(config)
            }
            Resolution::Unresolved(model) => {
                return Err(SelectionError::UnknownModel { model: model.clone() })
            }
        };

    if raw.is_empty() {
        return Err(SelectionError::NoCandidates {
            model: requested_model.to_string(),
        });
    }

    let mut candidates = Vec::with_capacity(raw.len());
    for (provider, record) in raw {
        if excluded_providers.iter().any(|p| p == provider.name.as_str()) {
            continue;
        }
        if tracker
            .is_in_cooldown(&provider.name, &record.canonical_id, now)
            .await
            .unwrap_or(false)
        {
            continue;
        }

        let tier = catalog.tier_of(&record.canonical_id).unwrap_or(0);
        let quota = tracker
            .get_quota_status(&provider.name, &record.canonical_id, &record.limits, now)
            .await
            .unwrap_or_else(|_| QuotaStatus { windows: Vec::new() });
        let latency_ms = tracker
            .get_latency_ms(&provider.name, &record.canonical_id)
            .await
            .unwrap_or(None);

        candidates.push(Candidate {
            provider: provider.name.clone(),
            provider_model_id: record.provider_model_id.clone(),
            canonical_id: record.canonical_id.clone(),
            tier,
            priority: provider.priority,
            is_free_credits: provider.is_free_credits,
            quota,
            latency_ms,
        });
    }

    if candidates.is_empty() {
        return Err(SelectionError::AllExcluded {
            model: requested_model.to_string(),
        });
    }

    candidates.sort_by(|a, b| b.tier.cmp(&a.tier).then(a.priority.cmp(&b.priority)));
    Ok(candidates)
}

/// Restrict `candidates` (already sorted by tier descending) to the prefix
/// sharing the single highest tier present. A [`crate::strategy::RoutingStrategy`]
/// never chooses across tiers — the driver only descends to a lower tier once
/// every candidate at the tier above has failed or exhausted.
pub fn highest_tier(candidates: &[Candidate]) -> &[Candidate] {
    let Some(top) = candidates.first().map(|c| c.tier) else {
        return candidates;
    };
    let end = candidates.iter().take_while(|c| c.tier == top).count();
    &candidates[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GenericAliasConfig, ModelDescriptor, ProviderDescriptor, ProviderModelRecord, RateLimits};
    use crate::store::InMemoryStore;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn model(id: &str, tier: u8) -> ModelDescriptor {
        ModelDescriptor {
            canonical_id: id.into(),
            tier,
            family: "f".into(),
            aliases: Default::default(),
        }
    }

    fn provider(name: &str, priority: u32, models: Vec<ProviderModelRecord>) -> ProviderDescriptor {
        ProviderDescriptor {
            name: ProviderName::new(name),
            display_name: name.into(),
            base_url: "https://example".into(),
            api_key: None,
            priority,
            enabled: true,
            is_free_credits: false,
            models,
        }
    }

    fn record(canonical: &str) -> ProviderModelRecord {
        ProviderModelRecord {
            canonical_id: canonical.into(),
            provider_model_id: canonical.into(),
            limits: RateLimits::default(),
        }
    }

    fn catalog() -> Catalog {
        let models = vec![model("big", 3), model("small", 1)];
        let mut generic = HashMap::new();
        generic.insert("best".into(), GenericAliasConfig::MinTier(1));
        let providers = vec![
            provider("A", 1, vec![record("big")]),
            provider("B", 0, vec![record("big")]),
            provider("C", 0, vec![record("small")]),
        ];
        Catalog::new(models, HashMap::new(), generic, providers).unwrap()
    }

    fn tracker() -> RateLimitTracker {
        RateLimitTracker::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn selects_candidates_sorted_by_tier_then_priority() {
        let cat = catalog();
        let t = tracker();
        let candidates = select_candidates(&cat, &t, "best", &[], Utc::now()).await.unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].tier, 3);
        assert_eq!(candidates[0].provider, ProviderName::new("B"));
        assert_eq!(candidates[1].provider, ProviderName::new("A"));
        assert_eq!(candidates[2].tier, 1);
    }

    #[tokio::test]
    async fn unknown_model_is_an_error() {
        let cat = catalog();
        let t = tracker();
        let err = select_candidates(&cat, &t, "ghost", &[], Utc::now()).await.unwrap_err();
        assert!(matches!(err, SelectionError::UnknownModel { .. }));
    }

    #[tokio::test]
    async fn excluded_providers_are_dropped() {
        let cat = catalog();
        let t = tracker();
        let candidates = select_candidates(&cat, &t, "big", &["B".into()], Utc::now())
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].provider, ProviderName::new("A"));
    }

    #[tokio::test]
    async fn cooldown_providers_are_dropped() {
        let cat = catalog();
        let t = tracker();
        let p = ProviderName::new("B");
        t.mark_rate_limited(&p, "big", None, chrono::Duration::seconds(60), Utc::now())
            .await
            .unwrap();
        let candidates = select_candidates(&cat, &t, "big", &[], Utc::now()).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].provider, ProviderName::new("A"));
    }

    #[tokio::test]
    async fn all_excluded_is_a_distinct_error_from_no_candidates() {
        let cat = catalog();
        let t = tracker();
        let err = select_candidates(&cat, &t, "big", &["A".into(), "B".into()], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SelectionError::AllExcluded { .. }));
    }

    #[tokio::test]
    async fn quota_exhausted_candidates_are_not_dropped_at_selection_time() {
        let models = vec![model("big", 3)];
        let limited = ProviderModelRecord {
            canonical_id: "big".into(),
            provider_model_id: "big".into(),
            limits: RateLimits {
                requests_per_minute: Some(1),
                ..Default::default()
            },
        };
        let providers = vec![
            provider("A", 1, vec![record("big")]),
            provider("B", 0, vec![limited]),
        ];
        let cat = Catalog::new(models, HashMap::new(), HashMap::new(), providers).unwrap();
        let t = tracker();
        let p = ProviderName::new("B");
        // One recorded request already saturates B's one-per-minute budget,
        // leaving B neither excluded nor in cooldown.
        t.record_usage(&p, "big", 1, Utc::now()).await.unwrap();
        let status = t
            .get_quota_status(&p, "big", &RateLimits { requests_per_minute: Some(1), ..Default::default() }, Utc::now())
            .await
            .unwrap();
        assert!(status.is_exhausted());

        let candidates = select_candidates(&cat, &t, "big", &[], Utc::now()).await.unwrap();
        assert!(candidates.iter().any(|c| c.provider == p));
    }

    #[test]
    fn highest_tier_restricts_to_the_top_tier_prefix() {
        let candidates = vec![
            Candidate {
                provider: ProviderName::new("B"),
                provider_model_id: "big".into(),
                canonical_id: "big".into(),
                tier: 3,
                priority: 0,
                is_free_credits: false,
                quota: QuotaStatus { windows: vec![] },
                latency_ms: None,
            },
            Candidate {
                provider: ProviderName::new("C"),
                provider_model_id: "small".into(),
                canonical_id: "small".into(),
                tier: 1,
                priority: 0,
                is_free_credits: false,
                quota: QuotaStatus { windows: vec![] },
                latency_ms: None,
            },
        ];
        let top = highest_tier(&candidates);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].provider, ProviderName::new("B"));
    }
}
