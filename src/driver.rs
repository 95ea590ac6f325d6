//! Execution driver.
//!
//! The only piece of this crate that actually makes network calls: select a
//! candidate, pre-flight its quota, invoke the upstream, classify whatever
//! comes back, and fail over to the next candidate with exponential backoff
//! until either a call succeeds or the retry budget and candidate pool are
//! both exhausted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::candidate::{select_candidates, Candidate, SelectionError};
use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::client::UpstreamClient;
use crate::config::RouterSettings;
use crate::error::RouterError;
use crate::estimator::TokenEstimator;
use crate::strategy::RoutingStrategy;
use crate::tracker::RateLimitTracker;

/// The upstream response plus the bookkeeping a caller needs to know which
/// provider actually answered and how much failover it took to get there.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub body: Value,
    pub provider: crate::catalog::ProviderName,
    pub model_id: String,
    pub latency_ms: Option<f64>,
    /// Number of upstream calls that failed before this one (0 on a
    /// first-try success). A candidate skipped by the pre-flight quota
    /// check never counts — it never reached the upstream.
    pub retry_count: u32,
}

/// Everything the driver needs for one `route` call. Cheap to construct —
/// every field is an `Arc` the [`crate::Router`] already holds.
pub struct DriverContext {
    pub catalog: Arc<Catalog>,
    pub tracker: Arc<RateLimitTracker>,
    pub settings: RouterSettings,
    pub clock: Arc<dyn Clock>,
    pub estimator: Arc<dyn TokenEstimator>,
    pub client: Arc<dyn UpstreamClient>,
    pub strategy: Arc<dyn RoutingStrategy>,
}

/// `min(initial * multiplier^(attempt-1), max)`, `attempt` starting at 1 for
/// the first retry (the first call itself is never delayed).
pub fn backoff_duration(initial_ms: u64, multiplier: f64, max_ms: u64, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let scaled = initial_ms as f64 * multiplier.powi(attempt as i32 - 1);
    Duration::from_millis((scaled.min(max_ms as f64)) as u64)
}

fn selection_error_to_router_error(err: SelectionError, model: &str) -> RouterError {
    match err {
        SelectionError::UnknownModel { model } | SelectionError::NoCandidates { model } => {
            RouterError::ModelNotFound { model }
        }
        SelectionError::AllExcluded { .. } => RouterError::AllProvidersExhausted {
            model: model.to_string(),
            attempted: Vec::new(),
            earliest_reset: None,
        },
        SelectionError::ProviderNotFound { .. } | SelectionError::StrategyError(_) => err.into(),
    }
}

/// Pick a candidate from `candidates` whose name isn't in `already_failed`,
/// restricted (by the strategy) to the highest tier actually present.
/// Returns `Ok(None)` once every candidate has already been tried — that is
/// the normal "stop retrying" signal, distinct from a strategy actually
/// failing.
async fn pick_next<'a>(
    strategy: &dyn RoutingStrategy,
    candidates: &'a [Candidate],
    already_failed: &[String],
) -> Result<Option<&'a Candidate>, SelectionError> {
    let remaining: Vec<Candidate> = candidates
        .iter()
        .filter(|c| !already_failed.iter().any(|f| f == c.provider.as_str()))
        .cloned()
        .collect();
    if remaining.is_empty() {
        return Ok(None);
    }
    let chosen = strategy.choose(&remaining).await?.clone();
    Ok(candidates.iter().find(|c| c.provider == chosen.provider && c.canonical_id == chosen.canonical_id))
}

/// Does accepting `estimated_tokens` more right now push any window in
/// `candidate`'s already-fetched quota snapshot over its limit?
fn would_exceed_quota(candidate: &Candidate, estimated_tokens: u64) -> bool {
    candidate.quota.windows.iter().any(|w| {
        let over_requests = w.requests_limit.is_some_and(|l| w.requests_used + 1 > l);
        let over_tokens = w.tokens_limit.is_some_and(|l| w.tokens_used + estimated_tokens > l);
        over_requests || over_tokens
    })
}

fn extract_usage_tokens(response: &Value) -> Option<u64> {
    response.get("usage")?.get("total_tokens")?.as_u64()
}

/// Drive a single non-streaming chat-completion request to completion,
/// failing over across candidates.
pub async fn drive_chat_completions(
    ctx: &DriverContext,
    requested_model: &str,
    request: Value,
) -> Result<RoutedResponse, RouterError> {
    let now = ctx.clock.now();
    let candidates = select_candidates(
        &ctx.catalog,
        &ctx.tracker,
        requested_model,
        &ctx.settings.excluded_providers,
        now,
    )
    .await
    .map_err(|e| selection_error_to_router_error(e, requested_model))?;

    let estimated_tokens = ctx
        .estimator
        .estimate(&request)
        .await
        .map_err(|e| RouterError::Configuration(format!("token estimation failed: {e}")))?;

    let mut already_failed: Vec<String> = Vec::new();
    let mut last_error: Option<RouterError> = None;
    let mut earliest_reset = None;
    let mut retry_count: u32 = 0;

    for attempt in 0..=ctx.settings.max_retries {
        let Some(candidate) = pick_next(ctx.strategy.as_ref(), &candidates, &already_failed)
            .await
            .map_err(|e| selection_error_to_router_error(e, requested_model))?
        else {
            break;
        };

        if would_exceed_quota(candidate, estimated_tokens) {
            debug!(provider = %candidate.provider, "skipping candidate, would exceed quota");
            already_failed.push(candidate.provider.as_str().to_string());
            continue;
        }

        if attempt > 0 {
            let wait = backoff_duration(
                ctx.settings.initial_backoff_ms,
                ctx.settings.backoff_multiplier,
                ctx.settings.max_backoff_ms,
                attempt,
            );
            tokio::time::sleep(wait).await;
        }

        let provider_descriptor = ctx
            .catalog
            .provider(&candidate.provider)
            .ok_or_else(|| SelectionError::ProviderNotFound {
                name: candidate.provider.as_str().to_string(),
            })?
            .clone();

        let mut body = request.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".into(), Value::String(candidate.provider_model_id.clone()));
        }

        let call_started = ctx.clock.now();
        match ctx.client.chat_completions(&provider_descriptor, body).await {
            Ok(response) => {
                let tokens_used = extract_usage_tokens(&response).unwrap_or(estimated_tokens);
                let _ = ctx
                    .tracker
                    .record_usage(&candidate.provider, &candidate.canonical_id, tokens_used, ctx.clock.now())
                    .await;
                let latency_ms = if ctx.settings.track_latency {
                    let latency_ms = (ctx.clock.now() - call_started).num_milliseconds().max(0) as f64;
                    let _ = ctx
                        .tracker
                        .record_latency(
                            &candidate.provider,
                            &candidate.canonical_id,
                            latency_ms,
                            ctx.settings.latency_decay,
                            ctx.settings.latency_sample_cap as u64,
                        )
                        .await;
                    Some(latency_ms)
                } else {
                    None
                };
                return Ok(RoutedResponse {
                    body: response,
                    provider: candidate.provider.clone(),
                    model_id: candidate.canonical_id.clone(),
                    latency_ms,
                    retry_count,
                });
            }
            Err(mut err) => {
                warn!(provider = %candidate.provider, error = %err, "upstream call failed");
                if let RouterError::RateLimited { reset_at, model, .. } = &mut err {
                    *model = candidate.canonical_id.clone();
                    let retry_after = reset_at.map(|r| r - Utc::now());
                    let until = ctx
                        .tracker
                        .mark_rate_limited(
                            &candidate.provider,
                            &candidate.canonical_id,
                            retry_after,
                            chrono::Duration::seconds(60),
                            ctx.clock.now(),
                        )
                        .await
                        .unwrap_or(ctx.clock.now());
                    earliest_reset = Some(earliest_reset.map_or(until, |e: chrono::DateTime<Utc>| e.min(until)));
                }
                already_failed.push(candidate.provider.as_str().to_string());
                last_error = Some(err);
                retry_count += 1;
            }
        }
    }

    if ctx.settings.throw_on_exhausted {
        Err(RouterError::AllProvidersExhausted {
            model: requested_model.to_string(),
            attempted: already_failed.into_iter().map(Into::into).collect(),
            earliest_reset,
        })
    } else {
        Err(last_error.unwrap_or(RouterError::ModelNotFound {
            model: requested_model.to_string(),
        }))
    }
}
