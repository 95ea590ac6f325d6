//! Routing strategies.
//!
//! A strategy only ever sees candidates already restricted to the highest
//! tier actually available (see [`crate::candidate::highest_tier`]); its job
//! is purely to break ties within that tier. Kept as a small `#[async_trait]`
//! role trait the same way `borsa-core::connector` keeps its provider roles
//! small and focused, so a caller can drop in a custom strategy without
//! touching selection or the driver.

use async_trait::async_trait;

use crate::candidate::{highest_tier, Candidate, SelectionError};

/// Chooses one candidate from an already tier-restricted, non-empty slice.
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    /// `candidates` is guaranteed non-empty; implementations may assume it.
    /// Custom strategies (weighted, latency-aware, cost-optimized) that need
    /// to signal a failure — an external scoring call failing, say — return
    /// [`SelectionError::StrategyError`] rather than panicking.
    async fn choose<'a>(&self, candidates: &'a [Candidate]) -> Result<&'a Candidate, SelectionError>;
}

/// Always prefers the candidate with the numerically lowest configured
/// priority, stable on ties (the first such candidate in catalog order
/// wins, which is already `select_candidates`'s sort order).
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityStrategy;

#[async_trait]
impl RoutingStrategy for PriorityStrategy {
    async fn choose<'a>(&self, candidates: &'a [Candidate]) -> Result<&'a Candidate, SelectionError> {
        let top = highest_tier(candidates);
        Ok(top.iter().min_by_key(|c| c.priority).expect("candidates is non-empty"))
    }
}

/// Prefers whichever candidate has consumed the smallest fraction of its
/// rate-limit budget, i.e. has the most headroom left. Availability score is
/// `1.0 - quota.max_utilization()`; ties within `epsilon` fall back to
/// priority order so the strategy doesn't thrash between two near-identical
/// candidates on every call.
#[derive(Debug, Clone, Copy)]
pub struct LeastUsedStrategy {
    epsilon: f64,
}

impl Default for LeastUsedStrategy {
    fn default() -> Self {
        Self { epsilon: 0.001 }
    }
}

impl LeastUsedStrategy {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    fn availability(candidate: &Candidate) -> f64 {
        1.0 - candidate.quota.max_utilization()
    }
}

#[async_trait]
impl RoutingStrategy for LeastUsedStrategy {
    async fn choose<'a>(&self, candidates: &'a [Candidate]) -> Result<&'a Candidate, SelectionError> {
        let top = highest_tier(candidates);
        let mut best = &top[0];
        let mut best_score = Self::availability(best);
        for candidate in &top[1..] {
            let score = Self::availability(candidate);
            if score > best_score + self.epsilon {
                best = candidate;
                best_score = score;
            } else if (score - best_score).abs() <= self.epsilon && candidate.priority < best.priority {
                best = candidate;
                best_score = score;
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProviderName;
    use crate::tracker::{QuotaStatus, WindowStatus};
    use crate::window::WindowKind;

    fn candidate(provider: &str, tier: u8, priority: u32, utilization_used: u64, limit: u64) -> Candidate {
        Candidate {
            provider: ProviderName::new(provider),
            provider_model_id: "m".into(),
            canonical_id: "m".into(),
            tier,
            priority,
            is_free_credits: false,
            quota: QuotaStatus {
                windows: vec![WindowStatus {
                    window: WindowKind::Minute,
                    requests_used: utilization_used,
                    requests_limit: Some(limit),
                    tokens_used: 0,
                    tokens_limit: None,
                    resets_in_secs: 30,
                }],
            },
            latency_ms: None,
        }
    }

    #[tokio::test]
    async fn priority_strategy_picks_lowest_priority() {
        let candidates = vec![candidate("A", 3, 2, 0, 10), candidate("B", 3, 0, 0, 10)];
        let chosen = PriorityStrategy.choose(&candidates).await.unwrap();
        assert_eq!(chosen.provider, ProviderName::new("B"));
    }

    #[tokio::test]
    async fn priority_strategy_ignores_lower_tier_candidates() {
        let candidates = vec![candidate("A", 3, 5, 0, 10), candidate("B", 1, 0, 0, 10)];
        let chosen = PriorityStrategy.choose(&candidates).await.unwrap();
        assert_eq!(chosen.provider, ProviderName::new("A"));
    }

    #[tokio::test]
    async fn least_used_picks_the_one_with_more_headroom() {
        let candidates = vec![candidate("A", 3, 0, 9, 10), candidate("B", 3, 0, 1, 10)];
        let chosen = LeastUsedStrategy::default().choose(&candidates).await.unwrap();
        assert_eq!(chosen.provider, ProviderName::new("B"));
    }

    #[tokio::test]
    async fn least_used_breaks_near_ties_by_priority() {
        let candidates = vec![candidate("A", 3, 1, 500, 1000), candidate("B", 3, 0, 501, 1000)];
        let chosen = LeastUsedStrategy::default().choose(&candidates).await.unwrap();
        assert_eq!(chosen.provider, ProviderName::new("B"));
    }

    #[tokio::test]
    async fn least_used_ignores_candidates_outside_the_top_tier() {
        let candidates = vec![candidate("A", 3, 0, 9, 10), candidate("B", 1, 0, 0, 10)];
        let chosen = LeastUsedStrategy::default().choose(&candidates).await.unwrap();
        assert_eq!(chosen.provider, ProviderName::new("A"));
    }
}
