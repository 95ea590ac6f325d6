//! Token estimation.
//!
//! Pre-flight quota checks need a token count before the upstream call has
//! happened, so an estimator fills the gap between "tokens we're about to
//! spend" and "tokens we actually spent" (the latter comes back in the
//! upstream's `usage` field and is what the driver records post-call).

use async_trait::async_trait;
use serde_json::Value;

/// Estimates how many tokens a chat-completion request will consume.
/// Implementations need not be exact — the pre-flight check treats the
/// estimate as a conservative budget check, and actual usage (when the
/// upstream reports it) is what gets recorded.
#[async_trait]
pub trait TokenEstimator: Send + Sync {
    async fn estimate(&self, request: &Value) -> anyhow::Result<u64>;
}

/// `ceil(chars / 4)` per message content string, plus a small per-message
/// and per-request overhead. Cheap, dependency-free, good enough for a
/// conservative pre-flight check when no tokenizer is available.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicEstimator {
    pub chars_per_token: f64,
    pub per_message_overhead: u64,
    pub per_request_overhead: u64,
}

impl HeuristicEstimator {
    pub fn new() -> Self {
        Self {
            chars_per_token: 4.0,
            per_message_overhead: 4,
            per_request_overhead: 3,
        }
    }
}

/// Forwards to [`HeuristicEstimator::new`] — a derived `Default` would
/// zero-initialize `chars_per_token` and divide by zero on first use.
impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenEstimator for HeuristicEstimator {
    async fn estimate(&self, request: &Value) -> anyhow::Result<u64> {
        let messages = request
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut total = self.per_request_overhead;
        for message in &messages {
            let content = message.get("content").and_then(Value::as_str).unwrap_or("");
            let tokens = (content.chars().count() as f64 / self.chars_per_token).ceil() as u64;
            total += tokens + self.per_message_overhead;
        }
        Ok(total)
    }
}

/// Tokenizer-backed estimate using `tiktoken-rs`'s `cl100k_base` encoding —
/// the same BPE OpenAI-family chat models use. Falls back to the heuristic
/// estimator's figure if the encoder can't be constructed.
pub struct TiktokenEstimator {
    fallback: HeuristicEstimator,
}

impl TiktokenEstimator {
    pub fn new() -> Self {
        Self {
            fallback: HeuristicEstimator::new(),
        }
    }
}

impl Default for TiktokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenEstimator for TiktokenEstimator {
    async fn estimate(&self, request: &Value) -> anyhow::Result<u64> {
        let Ok(bpe) = tiktoken_rs::cl100k_base() else {
            return self.fallback.estimate(request).await;
        };

        let messages = request
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut total: u64 = 3;
        for message in &messages {
            let content = message.get("content").and_then(Value::as_str).unwrap_or("");
            total += bpe.encode_with_special_tokens(content).len() as u64 + 4;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn heuristic_estimator_counts_every_message() {
        let estimator = HeuristicEstimator::new();
        let request = json!({
            "messages": [
                {"role": "user", "content": "hello world"},
                {"role": "assistant", "content": "hi there"},
            ]
        });
        let estimate = estimator.estimate(&request).await.unwrap();
        assert!(estimate > 0);
    }

    #[tokio::test]
    async fn heuristic_estimator_default_does_not_divide_by_zero() {
        let estimator = HeuristicEstimator::default();
        let request = json!({"messages": [{"role": "user", "content": "hello"}]});
        let estimate = estimator.estimate(&request).await.unwrap();
        assert!(estimate > 0 && estimate < 100);
    }

    #[tokio::test]
    async fn heuristic_estimator_handles_empty_messages() {
        let estimator = HeuristicEstimator::new();
        let request = json!({"messages": []});
        let estimate = estimator.estimate(&request).await.unwrap();
        assert_eq!(estimate, estimator.per_request_overhead);
    }

    #[tokio::test]
    async fn tiktoken_estimator_produces_a_plausible_count() {
        let estimator = TiktokenEstimator::new();
        let request = json!({
            "messages": [{"role": "user", "content": "The quick brown fox jumps over the lazy dog."}]
        });
        let estimate = estimator.estimate(&request).await.unwrap();
        assert!(estimate >= 5 && estimate < 100);
    }
}
