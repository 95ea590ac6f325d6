//! Time-window arithmetic.
//!
//! Three window kinds — minute, hour, day — each floor-aligned to the Unix
//! epoch, so a day boundary always falls on `00:00:00 UTC` rather than on
//! whatever instant the first request happened to arrive. This is the
//! "tumbling window" referred to throughout the tracker: once the aligned
//! start advances, the previous window's counters are dropped wholesale
//! rather than decayed gradually.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ProviderName;

/// One of the three window granularities the tracker accounts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    pub const ALL: [WindowKind; 3] = [WindowKind::Minute, WindowKind::Hour, WindowKind::Day];

    /// Window length in seconds.
    pub const fn length_secs(self) -> i64 {
        match self {
            WindowKind::Minute => 60,
            WindowKind::Hour => 3_600,
            WindowKind::Day => 86_400,
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WindowKind::Minute => "minute",
            WindowKind::Hour => "hour",
            WindowKind::Day => "day",
        })
    }
}

/// The floor-aligned start of `kind`'s window containing `now`.
///
/// `floor(now_epoch_secs / length) * length`, reconstructed as a UTC
/// timestamp. A day window therefore always starts at `00:00:00 UTC`.
pub fn window_start(kind: WindowKind, now: DateTime<Utc>) -> DateTime<Utc> {
    let len = kind.length_secs();
    let epoch = now.timestamp();
    let aligned = epoch.div_euclid(len) * len;
    Utc.timestamp_opt(aligned, 0).single().expect("aligned timestamp is always valid")
}

/// The instant `kind`'s current window ends (equivalently, the next window's
/// start).
pub fn window_end(kind: WindowKind, now: DateTime<Utc>) -> DateTime<Utc> {
    window_start(kind, now) + chrono::Duration::seconds(kind.length_secs())
}

/// Seconds remaining until `kind`'s current window resets. Never negative.
pub fn time_until_reset(kind: WindowKind, now: DateTime<Utc>) -> i64 {
    (window_end(kind, now) - now).num_seconds().max(0)
}

/// Storage key for a (provider, model, window) usage record.
///
/// Layout: `usage/<provider>/<model>/<window>`.
pub fn usage_key(provider: &ProviderName, model: &str, kind: WindowKind) -> String {
    format!("usage/{provider}/{model}/{kind}")
}

/// Storage key for a (provider, model) cooldown record: `cooldown/<provider>/<model>`.
pub fn cooldown_key(provider: &ProviderName, model: &str) -> String {
    format!("cooldown/{provider}/{model}")
}

/// Storage key for a (provider, model) latency record: `latency/<provider>/<model>`.
pub fn latency_key(provider: &ProviderName, model: &str) -> String {
    format!("latency/{provider}/{model}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(epoch_secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(epoch_secs, 0).single().unwrap()
    }

    #[test]
    fn minute_window_aligns_to_60s_boundary() {
        let now = at(125); // 2 minutes, 5 seconds past epoch
        assert_eq!(window_start(WindowKind::Minute, now), at(120));
        assert_eq!(window_end(WindowKind::Minute, now), at(180));
    }

    #[test]
    fn day_window_starts_at_midnight_utc() {
        let now = DateTime::parse_from_rfc3339("2026-03-15T14:32:07Z")
            .unwrap()
            .with_timezone(&Utc);
        let start = window_start(WindowKind::Day, now);
        assert_eq!(start.format("%H:%M:%S").to_string(), "00:00:00");
        assert_eq!(start.format("%Y-%m-%d").to_string(), "2026-03-15");
    }

    #[test]
    fn hour_window_start_is_idempotent_within_the_hour() {
        let a = at(3_600 * 5 + 10);
        let b = at(3_600 * 5 + 3_500);
        assert_eq!(window_start(WindowKind::Hour, a), window_start(WindowKind::Hour, b));
    }

    #[test]
    fn time_until_reset_counts_down_to_zero_at_boundary() {
        let just_before = at(179);
        let at_boundary = at(180);
        assert_eq!(time_until_reset(WindowKind::Minute, just_before), 1);
        assert_eq!(time_until_reset(WindowKind::Minute, at_boundary), 60);
    }

    #[test]
    fn usage_key_is_stable_and_namespaced() {
        let provider = ProviderName::new("groq");
        let key = usage_key(&provider, "llama-3.3-70b", WindowKind::Hour);
        assert_eq!(key, "usage/groq/llama-3.3-70b/hour");
    }

    #[test]
    fn distinct_window_kinds_never_collide() {
        let provider = ProviderName::new("groq");
        let keys: std::collections::HashSet<_> = WindowKind::ALL
            .iter()
            .map(|k| usage_key(&provider, "m", *k))
            .collect();
        assert_eq!(keys.len(), 3);
    }
}
