//! Rate-limit tracker.
//!
//! Sits directly on top of a [`StateStore`], translating the store's raw
//! records into the quota/cooldown questions the candidate-selection
//! pipeline actually asks: "how much headroom is left", "is this provider
//! currently cooling down", "record that a call just happened".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::warn;

use crate::catalog::{ProviderName, RateLimits};
use crate::store::StateStore;
use crate::window::{time_until_reset, WindowKind};

/// Usage vs. limit for one (provider, model, window) at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStatus {
    pub window: WindowKind,
    pub requests_used: u64,
    pub requests_limit: Option<u64>,
    pub tokens_used: u64,
    pub tokens_limit: Option<u64>,
    /// Seconds until this window resets, regardless of whether it is
    /// currently exhausted.
    pub resets_in_secs: i64,
}

impl WindowStatus {
    /// True if either the request or token cap for this window has been
    /// reached or exceeded. A window with no configured limit is never
    /// exhausted.
    pub fn is_exhausted(&self) -> bool {
        let over_requests = self
            .requests_limit
            .is_some_and(|limit| self.requests_used >= limit);
        let over_tokens = self.tokens_limit.is_some_and(|limit| self.tokens_used >= limit);
        over_requests || over_tokens
    }

    /// Fraction of the tighter of the two caps already consumed, in `[0, 1]`.
    /// `0.0` when neither metric has a configured limit (unlimited headroom).
    pub fn utilization(&self) -> f64 {
        let request_frac = self
            .requests_limit
            .filter(|&l| l > 0)
            .map(|l| self.requests_used as f64 / l as f64);
        let token_frac = self
            .tokens_limit
            .filter(|&l| l > 0)
            .map(|l| self.tokens_used as f64 / l as f64);
        request_frac
            .into_iter()
            .chain(token_frac)
            .fold(0.0_f64, f64::max)
    }
}

/// Aggregate quota picture for a (provider, model) pair across all three
/// window granularities.
#[derive(Debug, Clone)]
pub struct QuotaStatus {
    pub windows: Vec<WindowStatus>,
}

impl QuotaStatus {
    pub fn is_exhausted(&self) -> bool {
        self.windows.iter().any(WindowStatus::is_exhausted)
    }

    /// The worst (highest) utilization across all windows — used by the
    /// Least-Used strategy's availability score.
    pub fn max_utilization(&self) -> f64 {
        self.windows
            .iter()
            .map(WindowStatus::utilization)
            .fold(0.0_f64, f64::max)
    }

    pub fn window(&self, kind: WindowKind) -> Option<&WindowStatus> {
        self.windows.iter().find(|w| w.window == kind)
    }
}

pub struct RateLimitTracker {
    store: Arc<dyn StateStore>,
}

impl RateLimitTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Record that a request just completed against (provider, model),
    /// consuming `tokens` tokens, in every window granularity at once.
    /// Each window's write is attempted independently — one window's store
    /// failure does not prevent the others from being recorded.
    pub async fn record_usage(
        &self,
        provider: &ProviderName,
        model: &str,
        tokens: u64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let writes = WindowKind::ALL
            .iter()
            .map(|&kind| self.store.increment_usage(provider, model, kind, now, 1, tokens));
        let mut first_error = None;
        for (kind, result) in WindowKind::ALL.iter().zip(join_all(writes).await) {
            if let Err(err) = result {
                warn!(provider = %provider, model, window = ?kind, error = %err, "usage write failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Build a [`QuotaStatus`] for (provider, model) against `limits`,
    /// without mutating any counters.
    pub async fn get_quota_status(
        &self,
        provider: &ProviderName,
        model: &str,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> anyhow::Result<QuotaStatus> {
        let mut windows = Vec::with_capacity(3);
        for kind in WindowKind::ALL {
            let usage = self.store.get_usage(provider, model, kind, now).await?;
            windows.push(WindowStatus {
                window: kind,
                requests_used: usage.map(|u| u.requests).unwrap_or(0),
                requests_limit: limits.requests_for(kind),
                tokens_used: usage.map(|u| u.tokens).unwrap_or(0),
                tokens_limit: limits.tokens_for(kind),
                resets_in_secs: time_until_reset(kind, now),
            });
        }
        Ok(QuotaStatus { windows })
    }

    /// Would recording `estimated_tokens` more tokens right now push any
    /// window over its limit? Pre-flight check run before an upstream call.
    pub async fn can_make_request(
        &self,
        provider: &ProviderName,
        model: &str,
        limits: &RateLimits,
        estimated_tokens: u64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let status = self.get_quota_status(provider, model, limits, now).await?;
        for window in &status.windows {
            if let Some(limit) = window.requests_limit {
                if window.requests_used + 1 > limit {
                    return Ok(false);
                }
            }
            if let Some(limit) = window.tokens_limit {
                if window.tokens_used + estimated_tokens > limit {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Record a 429 observation: set a cooldown lasting `retry_after`
    /// (falling back to `default_cooldown` when the upstream gave no
    /// `Retry-After` hint).
    pub async fn mark_rate_limited(
        &self,
        provider: &ProviderName,
        model: &str,
        retry_after: Option<chrono::Duration>,
        default_cooldown: chrono::Duration,
        now: DateTime<Utc>,
    ) -> anyhow::Result<DateTime<Utc>> {
        let until = now + retry_after.unwrap_or(default_cooldown);
        self.store.set_cooldown(provider, model, until).await?;
        Ok(until)
    }

    pub async fn is_in_cooldown(
        &self,
        provider: &ProviderName,
        model: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self.store.get_cooldown(provider, model, now).await?.is_some())
    }

    pub async fn get_cooldown_until(
        &self,
        provider: &ProviderName,
        model: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .get_cooldown(provider, model, now)
            .await?
            .map(|c| c.until))
    }

    pub async fn clear_cooldown(&self, provider: &ProviderName, model: &str) -> anyhow::Result<()> {
        self.store.clear_cooldown(provider, model).await
    }

    pub async fn record_latency(
        &self,
        provider: &ProviderName,
        model: &str,
        sample_ms: f64,
        decay: f64,
        sample_cap: u64,
    ) -> anyhow::Result<f64> {
        Ok(self
            .store
            .update_latency(provider, model, sample_ms, decay, sample_cap)
            .await?
            .ema_ms)
    }

    pub async fn get_latency_ms(
        &self,
        provider: &ProviderName,
        model: &str,
    ) -> anyhow::Result<Option<f64>> {
        Ok(self.store.get_latency(provider, model).await?.map(|l| l.ema_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CooldownRecord, InMemoryStore, LatencyRecord, UsageRecord};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// A [`StateStore`] whose `increment_usage` always fails for one chosen
    /// window kind, to verify `record_usage` still attempts the other two.
    struct FlakyStore {
        fails_on: WindowKind,
        attempts: AtomicUsize,
        inner: InMemoryStore,
        succeeded: Mutex<Vec<WindowKind>>,
    }

    impl FlakyStore {
        fn new(fails_on: WindowKind) -> Self {
            Self {
                fails_on,
                attempts: AtomicUsize::new(0),
                inner: InMemoryStore::new(),
                succeeded: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StateStore for FlakyStore {
        async fn increment_usage(
            &self,
            provider: &ProviderName,
            model: &str,
            window: WindowKind,
            now: DateTime<Utc>,
            requests: u64,
            tokens: u64,
        ) -> anyhow::Result<UsageRecord> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if window == self.fails_on {
                anyhow::bail!("simulated write failure");
            }
            self.succeeded.lock().unwrap().push(window);
            self.inner
                .increment_usage(provider, model, window, now, requests, tokens)
                .await
        }

        async fn get_usage(
            &self,
            provider: &ProviderName,
            model: &str,
            window: WindowKind,
            now: DateTime<Utc>,
        ) -> anyhow::Result<Option<UsageRecord>> {
            self.inner.get_usage(provider, model, window, now).await
        }

        async fn set_cooldown(&self, provider: &ProviderName, model: &str, until: DateTime<Utc>) -> anyhow::Result<()> {
            self.inner.set_cooldown(provider, model, until).await
        }

        async fn get_cooldown(
            &self,
            provider: &ProviderName,
            model: &str,
            now: DateTime<Utc>,
        ) -> anyhow::Result<Option<CooldownRecord>> {
            self.inner.get_cooldown(provider, model, now).await
        }

        async fn clear_cooldown(&self, provider: &ProviderName, model: &str) -> anyhow::Result<()> {
            self.inner.clear_cooldown(provider, model).await
        }

        async fn get_latency(&self, provider: &ProviderName, model: &str) -> anyhow::Result<Option<LatencyRecord>> {
            self.inner.get_latency(provider, model).await
        }

        async fn update_latency(
            &self,
            provider: &ProviderName,
            model: &str,
            sample_ms: f64,
            decay: f64,
            sample_cap: u64,
        ) -> anyhow::Result<LatencyRecord> {
            self.inner.update_latency(provider, model, sample_ms, decay, sample_cap).await
        }

        async fn clear(&self) -> anyhow::Result<()> {
            self.inner.clear().await
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn tracker() -> RateLimitTracker {
        RateLimitTracker::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn record_usage_attempts_every_window_even_if_one_write_fails() {
        let store = Arc::new(FlakyStore::new(WindowKind::Hour));
        let t = RateLimitTracker::new(store.clone());
        let p = ProviderName::new("groq");

        let err = t.record_usage(&p, "m", 500, at(10)).await.unwrap_err();
        assert!(err.to_string().contains("simulated write failure"));

        assert_eq!(store.attempts.load(Ordering::SeqCst), WindowKind::ALL.len());
        let succeeded = store.succeeded.lock().unwrap();
        assert!(succeeded.contains(&WindowKind::Minute));
        assert!(succeeded.contains(&WindowKind::Day));
        assert!(!succeeded.contains(&WindowKind::Hour));
    }

    #[tokio::test]
    async fn quota_status_reflects_recorded_usage() {
        let t = tracker();
        let p = ProviderName::new("groq");
        t.record_usage(&p, "m", 500, at(10)).await.unwrap();
        let limits = RateLimits {
            requests_per_minute: Some(10),
            tokens_per_minute: Some(1000),
            ..Default::default()
        };
        let status = t.get_quota_status(&p, "m", &limits, at(20)).await.unwrap();
        let minute = status.window(WindowKind::Minute).unwrap();
        assert_eq!(minute.requests_used, 1);
        assert_eq!(minute.tokens_used, 500);
        assert!(!status.is_exhausted());
    }

    #[tokio::test]
    async fn can_make_request_false_when_token_budget_would_be_exceeded() {
        let t = tracker();
        let p = ProviderName::new("groq");
        t.record_usage(&p, "m", 900, at(10)).await.unwrap();
        let limits = RateLimits {
            tokens_per_minute: Some(1000),
            ..Default::default()
        };
        let ok = t.can_make_request(&p, "m", &limits, 200, at(20)).await.unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn can_make_request_true_with_unlimited_quota() {
        let t = tracker();
        let p = ProviderName::new("groq");
        let ok = t
            .can_make_request(&p, "m", &RateLimits::default(), 1_000_000, at(20))
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn mark_rate_limited_uses_retry_after_when_present() {
        let t = tracker();
        let p = ProviderName::new("groq");
        let until = t
            .mark_rate_limited(&p, "m", Some(chrono::Duration::seconds(5)), chrono::Duration::seconds(60), at(100))
            .await
            .unwrap();
        assert_eq!(until, at(105));
        assert!(t.is_in_cooldown(&p, "m", at(102)).await.unwrap());
        assert!(!t.is_in_cooldown(&p, "m", at(106)).await.unwrap());
    }

    #[tokio::test]
    async fn mark_rate_limited_falls_back_to_default_cooldown() {
        let t = tracker();
        let p = ProviderName::new("groq");
        let until = t
            .mark_rate_limited(&p, "m", None, chrono::Duration::seconds(30), at(100))
            .await
            .unwrap();
        assert_eq!(until, at(130));
    }

    #[tokio::test]
    async fn clear_cooldown_ends_it_immediately() {
        let t = tracker();
        let p = ProviderName::new("groq");
        t.mark_rate_limited(&p, "m", None, chrono::Duration::seconds(60), at(0))
            .await
            .unwrap();
        t.clear_cooldown(&p, "m").await.unwrap();
        assert!(!t.is_in_cooldown(&p, "m", at(1)).await.unwrap());
    }

    #[tokio::test]
    async fn utilization_picks_the_tighter_of_requests_and_tokens() {
        let status = WindowStatus {
            window: WindowKind::Minute,
            requests_used: 9,
            requests_limit: Some(10),
            tokens_used: 100,
            tokens_limit: Some(1000),
            resets_in_secs: 30,
        };
        assert!((status.utilization() - 0.9).abs() < 1e-9);
    }
}
