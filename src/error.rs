//! Tagged error enum for the router core.
//!
//! Unlike an HTTP edge — where a single `AppError(anyhow::Error)` wrapper is
//! appropriate because every failure ultimately becomes a response body — a
//! library's callers need to match on failure *kind*: a `ModelNotFound` is a
//! caller bug, an `AllProvidersExhausted` might be worth a backoff-and-retry
//! at a higher level, a `ConfigurationError` should crash startup. So
//! [`RouterError`] is a `thiserror`-derived enum with one variant per
//! documented failure mode, not a string-wrapping catch-all.
//!
//! Adapter code (the default upstream client) still reaches for
//! `anyhow::Context` internally when talking to a genuinely "stringly" boundary
//! — parsing an upstream's JSON, describing a connection failure — then
//! converts into a typed variant here before it crosses back into routing
//! logic.

use chrono::{DateTime, Utc};

use crate::catalog::ProviderName;

/// Every way the router core can fail.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Invalid or empty provider list, unknown provider kind, or an alias /
    /// provider-model record referencing an unknown canonical id. Fatal at
    /// construction — `Router::build` returns this instead of silently
    /// falling back to a default.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The resolved model name matched no provider, possibly after
    /// cooldown/quota filtering removed every candidate.
    #[error("no provider available for model `{model}`")]
    ModelNotFound {
        /// The model token the caller requested (before or after alias
        /// resolution, whichever is more informative for the caller).
        model: String,
    },

    /// Internal signal raised by the upstream client when it observes a 429.
    /// The driver always intercepts this (writes a cooldown, fails over);
    /// it is only ever visible to a caller via [`RouterError::AllProvidersExhausted`]
    /// when `throw_on_exhausted` is set and every candidate cooled down.
    #[error("provider `{provider}` rate-limited model `{model}`")]
    RateLimited {
        provider: ProviderName,
        model: String,
        /// Absolute time the rate limit is expected to clear, if the upstream
        /// supplied a `Retry-After` header.
        reset_at: Option<DateTime<Utc>>,
    },

    /// Any non-429 HTTP or transport error from an upstream call.
    #[error("provider `{provider}` request failed (status {status:?}): {raw}")]
    Provider {
        provider: ProviderName,
        status: Option<u16>,
        raw: String,
    },

    /// A per-call deadline was exceeded. Treated identically to
    /// [`RouterError::Provider`] by the driver (triggers backoff + failover)
    /// but kept as a distinct variant so callers can tell the two apart.
    #[error("provider `{provider}` timed out after {timeout_ms}ms")]
    Timeout {
        provider: ProviderName,
        timeout_ms: u64,
    },

    /// Every candidate was excluded (by cooldown, quota, or failure) and the
    /// retry budget was exhausted. Only raised when `throw_on_exhausted` is
    /// set; otherwise the driver returns the last error it observed instead.
    #[error("all providers exhausted for model `{model}`; attempted {attempted:?}")]
    AllProvidersExhausted {
        model: String,
        attempted: Vec<ProviderName>,
        /// Earliest cooldown expiry among all attempted (provider, model)
        /// pairs, if any cooldown was recorded during the attempt.
        earliest_reset: Option<DateTime<Utc>>,
    },

    /// Internal selection-pipeline failure; see [`crate::candidate::SelectionError`]
    /// for the finer-grained tag. Surfaced to callers as [`RouterError::ModelNotFound`]
    /// or [`RouterError::AllProvidersExhausted`] by the driver, so this variant
    /// should rarely escape the crate boundary.
    #[error("selection error: {0}")]
    Selection(#[from] crate::candidate::SelectionError),
}

impl RouterError {
    /// True for failures the driver should treat as "try the next provider",
    /// false for failures that should propagate immediately (configuration
    /// errors never reach the driver loop at all).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouterError::RateLimited { .. } | RouterError::Provider { .. } | RouterError::Timeout { .. }
        )
    }
}
