//! Persistence seam between the rate-limit
//! tracker and whatever backs it — in-process memory by default, but the
//! trait is the extension point for a Redis- or database-backed store in a
//! multi-process deployment.
//!
//! Modeled as one `#[async_trait]` role trait (`borsa-core`'s
//! `HistoryProvider`/`QuoteProvider` style), one default in-process
//! implementation.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::catalog::ProviderName;
use crate::window::WindowKind;

/// A single (provider, model, window) usage counter as stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageRecord {
    pub requests: u64,
    pub tokens: u64,
    /// The aligned start of the window this record belongs to. A store
    /// implementation uses this to detect "this record is from a window
    /// that has since rolled over" without re-deriving it from `Utc::now()`.
    pub window_start: DateTime<Utc>,
}

/// A (provider, model) cooldown marker, written when a 429 is observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownRecord {
    pub until: DateTime<Utc>,
}

/// A (provider, model) rolling latency estimate (optional feature).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyRecord {
    pub ema_ms: f64,
    pub sample_count: u64,
}

/// Persistence for rate-limit bookkeeping. Every method is keyed by
/// provider + model (+ window, for usage) rather than an opaque string, so
/// implementations can choose their own storage layout.
///
/// All methods must be safe to call concurrently for distinct keys; callers
/// rely on `increment_usage` being atomic per key (read-modify-write must not
/// race two callers into double-incrementing or missing a window rollover).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomically increment the (provider, model, window) counter for the
    /// window containing `now`, resetting to zero first if the stored
    /// record belongs to an earlier window (tumbling reset). Returns the
    /// post-increment record.
    async fn increment_usage(
        &self,
        provider: &ProviderName,
        model: &str,
        window: WindowKind,
        now: DateTime<Utc>,
        requests: u64,
        tokens: u64,
    ) -> anyhow::Result<UsageRecord>;

    /// Current usage for (provider, model, window), without mutating it.
    /// Returns `None` if nothing has been recorded, or if the stored record
    /// belongs to a window that has since rolled over relative to `now`.
    async fn get_usage(
        &self,
        provider: &ProviderName,
        model: &str,
        window: WindowKind,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<UsageRecord>>;

    async fn set_cooldown(
        &self,
        provider: &ProviderName,
        model: &str,
        until: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Current cooldown for (provider, model), if any and still active as of
    /// `now`. An expired cooldown is treated as absent (implementations may
    /// lazily evict it, but are not required to).
    async fn get_cooldown(
        &self,
        provider: &ProviderName,
        model: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<CooldownRecord>>;

    async fn clear_cooldown(&self, provider: &ProviderName, model: &str) -> anyhow::Result<()>;

    async fn get_latency(
        &self,
        provider: &ProviderName,
        model: &str,
    ) -> anyhow::Result<Option<LatencyRecord>>;

    /// Fold one new latency sample into the stored EMA, creating the record
    /// if absent. `decay` is the EMA weight given to the new sample;
    /// `sample_cap` bounds `sample_count` so it never overflows or loses
    /// meaning as "number of samples so far" once saturated.
    async fn update_latency(
        &self,
        provider: &ProviderName,
        model: &str,
        sample_ms: f64,
        decay: f64,
        sample_cap: u64,
    ) -> anyhow::Result<LatencyRecord>;

    /// Drop all stored state. Intended for tests and admin tooling, not the
    /// request path.
    async fn clear(&self) -> anyhow::Result<()>;

    /// Release any resources held by the store (connection pools, etc).
    /// The in-memory store's default implementation is a no-op.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
