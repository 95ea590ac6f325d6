//! Upstream client.
//!
//! Everything the driver knows about "talking to a provider" goes through
//! this trait — the default implementation is a single OpenAI-compatible
//! HTTP client: every provider in scope here speaks the same OpenAI-shaped
//! wire format, so there is no Anthropic/Ollama schema translation to carry.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde_json::Value;

use crate::catalog::ProviderDescriptor;
use crate::error::RouterError;

/// A boxed stream of raw SSE byte chunks.
pub type SseStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// What the driver needs from a provider connection. A custom implementation
/// can wrap a non-HTTP transport (gRPC, an in-process mock, a local model
/// runner) as long as it can still report success/failure in terms of
/// [`RouterError`].
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn chat_completions(
        &self,
        provider: &ProviderDescriptor,
        request: Value,
    ) -> Result<Value, RouterError>;

    async fn chat_completions_stream(
        &self,
        provider: &ProviderDescriptor,
        request: Value,
    ) -> Result<SseStream, RouterError>;

    async fn health_check(&self, provider: &ProviderDescriptor) -> Result<bool, RouterError>;
}

/// Default [`UpstreamClient`]: plain OpenAI-compatible `/chat/completions`
/// over `reqwest`, one client built per call so each provider's
/// `Authorization` header and timeout can differ freely.
#[derive(Debug, Default, Clone)]
pub struct HttpUpstreamClient {
    default_timeout_ms: u64,
}

impl HttpUpstreamClient {
    pub fn new() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    fn build_client(&self, provider: &ProviderDescriptor) -> Result<Client, RouterError> {
        let mut builder = Client::builder().timeout(Duration::from_millis(self.default_timeout_ms));
        if let Some(key) = &provider.api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                RouterError::Provider {
                    provider: provider.name.clone(),
                    status: None,
                    raw: format!("invalid api key header: {e}"),
                }
            })?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        builder.build().map_err(|e| RouterError::Provider {
            provider: provider.name.clone(),
            status: None,
            raw: e.to_string(),
        })
    }

    /// `Retry-After` can be a delay in seconds or an HTTP-date; the driver
    /// only needs the delay form, which is what every provider in practice
    /// sends on a 429.
    fn parse_retry_after(response: &reqwest::Response) -> Option<chrono::Duration> {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<i64>()
            .ok()
            .map(chrono::Duration::seconds)
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn chat_completions(
        &self,
        provider: &ProviderDescriptor,
        request: Value,
    ) -> Result<Value, RouterError> {
        let client = self.build_client(provider)?;
        let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));
        let started = Utc::now();

        let response = client.post(&url).json(&request).send().await.map_err(|e| {
            if e.is_timeout() {
                RouterError::Timeout {
                    provider: provider.name.clone(),
                    timeout_ms: self.default_timeout_ms,
                }
            } else {
                RouterError::Provider {
                    provider: provider.name.clone(),
                    status: None,
                    raw: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = Self::parse_retry_after(&response);
            return Err(RouterError::RateLimited {
                provider: provider.name.clone(),
                model: String::new(),
                reset_at: retry_after.map(|d| started + d),
            });
        }
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(RouterError::Provider {
                provider: provider.name.clone(),
                status: Some(status.as_u16()),
                raw,
            });
        }

        response.json::<Value>().await.map_err(|e| RouterError::Provider {
            provider: provider.name.clone(),
            status: Some(status.as_u16()),
            raw: format!("invalid JSON response: {e}"),
        })
    }

    async fn chat_completions_stream(
        &self,
        provider: &ProviderDescriptor,
        mut request: Value,
    ) -> Result<SseStream, RouterError> {
        if let Some(obj) = request.as_object_mut() {
            obj.insert("stream".into(), Value::Bool(true));
        }
        let client = self.build_client(provider)?;
        let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));

        let response = client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RouterError::Timeout {
                        provider: provider.name.clone(),
                        timeout_ms: self.default_timeout_ms,
                    }
                } else {
                    RouterError::Provider {
                        provider: provider.name.clone(),
                        status: None,
                        raw: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = Self::parse_retry_after(&response);
            return Err(RouterError::RateLimited {
                provider: provider.name.clone(),
                model: String::new(),
                reset_at: retry_after.map(|d| Utc::now() + d),
            });
        }
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(RouterError::Provider {
                provider: provider.name.clone(),
                status: Some(status.as_u16()),
                raw,
            });
        }

        let stream = response.bytes_stream().map(|r| r.map_err(anyhow::Error::from));
        Ok(Box::pin(stream))
    }

    async fn health_check(&self, provider: &ProviderDescriptor) -> Result<bool, RouterError> {
        let client = self.build_client(provider)?;
        let url = format!("{}/models", provider.base_url.trim_end_matches('/'));
        let response = client.get(&url).send().await.map_err(|e| RouterError::Provider {
            provider: provider.name.clone(),
            status: None,
            raw: e.to_string(),
        })?;
        Ok(response.status().is_success())
    }
}
