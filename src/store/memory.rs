//! In-memory [`StateStore`], keyed the same way a `RateLimiter`
//! keys its per-IP token buckets: one `DashMap` entry per key, mutated under
//! that entry's own shard lock rather than a single global mutex.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::catalog::ProviderName;
use crate::window::{self, window_start, WindowKind};

use super::{CooldownRecord, LatencyRecord, StateStore, UsageRecord};

#[derive(Default)]
pub struct InMemoryStore {
    usage: DashMap<String, UsageRecord>,
    cooldowns: DashMap<String, CooldownRecord>,
    latency: DashMap<String, LatencyRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn increment_usage(
        &self,
        provider: &ProviderName,
        model: &str,
        kind: WindowKind,
        now: DateTime<Utc>,
        requests: u64,
        tokens: u64,
    ) -> anyhow::Result<UsageRecord> {
        let key = window::usage_key(provider, model, kind);
        let current_start = window_start(kind, now);
        let mut entry = self.usage.entry(key).or_insert(UsageRecord {
            requests: 0,
            tokens: 0,
            window_start: current_start,
        });
        if entry.window_start != current_start {
            entry.requests = 0;
            entry.tokens = 0;
            entry.window_start = current_start;
        }
        entry.requests += requests;
        entry.tokens += tokens;
        Ok(*entry)
    }

    async fn get_usage(
        &self,
        provider: &ProviderName,
        model: &str,
        kind: WindowKind,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<UsageRecord>> {
        let key = window::usage_key(provider, model, kind);
        let current_start = window_start(kind, now);
        Ok(self
            .usage
            .get(&key)
            .filter(|r| r.window_start == current_start)
            .map(|r| *r))
    }

    async fn set_cooldown(
        &self,
        provider: &ProviderName,
        model: &str,
        until: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let key = window::cooldown_key(provider, model);
        self.cooldowns.insert(key, CooldownRecord { until });
        Ok(())
    }

    async fn get_cooldown(
        &self,
        provider: &ProviderName,
        model: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<CooldownRecord>> {
        let key = window::cooldown_key(provider, model);
        Ok(self
            .cooldowns
            .get(&key)
            .filter(|c| c.until > now)
            .map(|c| *c))
    }

    async fn clear_cooldown(&self, provider: &ProviderName, model: &str) -> anyhow::Result<()> {
        let key = window::cooldown_key(provider, model);
        self.cooldowns.remove(&key);
        Ok(())
    }

    async fn get_latency(
        &self,
        provider: &ProviderName,
        model: &str,
    ) -> anyhow::Result<Option<LatencyRecord>> {
        let key = window::latency_key(provider, model);
        Ok(self.latency.get(&key).map(|l| *l))
    }

    async fn update_latency(
        &self,
        provider: &ProviderName,
        model: &str,
        sample_ms: f64,
        decay: f64,
        sample_cap: u64,
    ) -> anyhow::Result<LatencyRecord> {
        let key = window::latency_key(provider, model);
        let mut entry = self.latency.entry(key).or_insert(LatencyRecord {
            ema_ms: sample_ms,
            sample_count: 0,
        });
        if entry.sample_count == 0 {
            entry.ema_ms = sample_ms;
        } else {
            entry.ema_ms = decay * sample_ms + (1.0 - decay) * entry.ema_ms;
        }
        entry.sample_count = (entry.sample_count + 1).min(sample_cap);
        Ok(*entry)
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.usage.clear();
        self.cooldowns.clear();
        self.latency.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[tokio::test]
    async fn increment_usage_accumulates_within_the_same_window() {
        let store = InMemoryStore::new();
        let p = ProviderName::new("groq");
        store
            .increment_usage(&p, "m", WindowKind::Minute, at(10), 1, 100)
            .await
            .unwrap();
        let rec = store
            .increment_usage(&p, "m", WindowKind::Minute, at(20), 1, 50)
            .await
            .unwrap();
        assert_eq!(rec.requests, 2);
        assert_eq!(rec.tokens, 150);
    }

    #[tokio::test]
    async fn increment_usage_resets_on_window_rollover() {
        let store = InMemoryStore::new();
        let p = ProviderName::new("groq");
        store
            .increment_usage(&p, "m", WindowKind::Minute, at(10), 5, 500)
            .await
            .unwrap();
        let rec = store
            .increment_usage(&p, "m", WindowKind::Minute, at(70), 1, 10)
            .await
            .unwrap();
        assert_eq!(rec.requests, 1);
        assert_eq!(rec.tokens, 10);
    }

    #[tokio::test]
    async fn get_usage_returns_none_for_rolled_over_window() {
        let store = InMemoryStore::new();
        let p = ProviderName::new("groq");
        store
            .increment_usage(&p, "m", WindowKind::Minute, at(10), 1, 1)
            .await
            .unwrap();
        let usage = store
            .get_usage(&p, "m", WindowKind::Minute, at(200))
            .await
            .unwrap();
        assert!(usage.is_none());
    }

    #[tokio::test]
    async fn cooldown_set_get_clear_roundtrip() {
        let store = InMemoryStore::new();
        let p = ProviderName::new("groq");
        store.set_cooldown(&p, "m", at(100)).await.unwrap();
        assert!(store.get_cooldown(&p, "m", at(50)).await.unwrap().is_some());
        assert!(store.get_cooldown(&p, "m", at(150)).await.unwrap().is_none());
        store.clear_cooldown(&p, "m").await.unwrap();
        assert!(store.get_cooldown(&p, "m", at(50)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latency_ema_converges_toward_repeated_samples() {
        let store = InMemoryStore::new();
        let p = ProviderName::new("groq");
        store.update_latency(&p, "m", 100.0, 0.8, 100).await.unwrap();
        let rec = store.update_latency(&p, "m", 200.0, 0.8, 100).await.unwrap();
        assert!((rec.ema_ms - 180.0).abs() < 1e-9);
        assert_eq!(rec.sample_count, 2);
    }

    #[tokio::test]
    async fn latency_sample_count_saturates_at_cap() {
        let store = InMemoryStore::new();
        let p = ProviderName::new("groq");
        for _ in 0..5 {
            store.update_latency(&p, "m", 10.0, 0.8, 3).await.unwrap();
        }
        let rec = store.get_latency(&p, "m").await.unwrap().unwrap();
        assert_eq!(rec.sample_count, 3);
    }

    #[tokio::test]
    async fn clear_wipes_every_table() {
        let store = InMemoryStore::new();
        let p = ProviderName::new("groq");
        store
            .increment_usage(&p, "m", WindowKind::Minute, at(1), 1, 1)
            .await
            .unwrap();
        store.set_cooldown(&p, "m", at(100)).await.unwrap();
        store.update_latency(&p, "m", 10.0, 0.8, 100).await.unwrap();
        store.clear().await.unwrap();
        assert!(store
            .get_usage(&p, "m", WindowKind::Minute, at(1))
            .await
            .unwrap()
            .is_none());
        assert!(store.get_cooldown(&p, "m", at(1)).await.unwrap().is_none());
        assert!(store.get_latency(&p, "m").await.unwrap().is_none());
    }
}
