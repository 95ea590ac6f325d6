//! Client-side routing core for chat-completion requests across multiple
//! LLM providers.
//!
//! A [`Router`] resolves a requested model name against a configured
//! catalog of providers, picks a candidate via a pluggable
//! [`strategy::RoutingStrategy`], tracks per-(provider, model) rate-limit
//! usage in a pluggable [`store::StateStore`], and fails over across
//! candidates with bounded retries and exponential backoff when a call is
//! rate-limited or fails outright.
//!
//! ```no_run
//! use llm_router_core::{Router, RouterBuilder};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let models = std::fs::read_to_string("models.yaml")?;
//! let providers = std::fs::read_to_string("providers.yaml")?;
//! let router = RouterBuilder::new()
//!     .models_yaml(&models)?
//!     .providers_yaml(&providers)?
//!     .build()?;
//!
//! let response = router
//!     .route("best", serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}))
//!     .await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod candidate;
pub mod catalog;
pub mod client;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod estimator;
pub mod store;
pub mod strategy;
pub mod tracker;
pub mod window;

use std::sync::Arc;

use serde_json::Value;

pub use catalog::{Catalog, ProviderDescriptor, ProviderName};
pub use client::{HttpUpstreamClient, SseStream, UpstreamClient};
pub use clock::{Clock, SystemClock, TestClock};
pub use config::{
    ModelsBundle, ProviderConnectionOptions, ProvidersBundle, RouterSettings,
};
pub use driver::RoutedResponse;
pub use error::RouterError;
pub use estimator::{HeuristicEstimator, TiktokenEstimator, TokenEstimator};
pub use store::{InMemoryStore, StateStore};
pub use strategy::{LeastUsedStrategy, PriorityStrategy, RoutingStrategy};
pub use tracker::{QuotaStatus, RateLimitTracker, WindowStatus};

use driver::DriverContext;

/// A still-opening SSE stream plus which candidate was chosen to serve it.
/// No `latency_ms` — a streaming call's latency to first byte isn't
/// comparable to a non-streaming call's full round-trip. `route_stream`
/// makes a single selection and does not fail over, so `retry_count` is
/// always 0.
pub struct RoutedStream {
    pub stream: SseStream,
    pub provider: ProviderName,
    pub model_id: String,
    pub retry_count: u32,
}

/// A fully built, immutable router. Cheap to clone (every field is an
/// `Arc`) and safe to share across tasks.
#[derive(Clone)]
pub struct Router {
    ctx: Arc<DriverContext>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}

impl Router {
    /// Route one non-streaming chat-completion request for `model`,
    /// selecting a candidate, pre-flighting its quota, invoking the
    /// upstream, and failing over on error.
    pub async fn route(&self, model: &str, request: Value) -> Result<RoutedResponse, RouterError> {
        driver::drive_chat_completions(&self.ctx, model, request).await
    }

    /// Stream one chat-completion request. Unlike [`Router::route`], a
    /// streaming call is not retried after the first byte has been
    /// delivered — failover only happens before the stream opens.
    pub async fn route_stream(&self, model: &str, request: Value) -> Result<RoutedStream, RouterError> {
        let now = self.ctx.clock.now();
        let candidates = candidate::select_candidates(
            &self.ctx.catalog,
            &self.ctx.tracker,
            model,
            &self.ctx.settings.excluded_providers,
            now,
        )
        .await
        .map_err(|e| match e {
            candidate::SelectionError::UnknownModel { model } | candidate::SelectionError::NoCandidates { model } => {
                RouterError::ModelNotFound { model }
            }
            candidate::SelectionError::AllExcluded { model } => RouterError::AllProvidersExhausted {
                model,
                attempted: Vec::new(),
                earliest_reset: None,
            },
            e @ (candidate::SelectionError::ProviderNotFound { .. } | candidate::SelectionError::StrategyError(_)) => {
                e.into()
            }
        })?;
        let top = candidate::highest_tier(&candidates);
        let chosen = self.ctx.strategy.choose(top).await?;
        let provider = self
            .ctx
            .catalog
            .provider(&chosen.provider)
            .ok_or_else(|| candidate::SelectionError::ProviderNotFound {
                name: chosen.provider.as_str().to_string(),
            })?
            .clone();

        let model_id = chosen.canonical_id.clone();
        let provider_name = chosen.provider.clone();
        let mut body = request;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".into(), Value::String(chosen.provider_model_id.clone()));
        }
        let stream = self.ctx.client.chat_completions_stream(&provider, body).await?;
        Ok(RoutedStream {
            stream,
            provider: provider_name,
            model_id,
            retry_count: 0,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.ctx.catalog
    }

    pub fn tracker(&self) -> &RateLimitTracker {
        &self.ctx.tracker
    }
}

/// Builds a [`Router`] from YAML config bundles and optional component
/// overrides, validating everything eagerly — the same "fail at
/// construction, not at request time" posture.
pub struct RouterBuilder {
    models: Option<ModelsBundle>,
    providers: Option<ProvidersBundle>,
    connections: Vec<ProviderConnectionOptions>,
    settings: RouterSettings,
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore>,
    estimator: Arc<dyn TokenEstimator>,
    client: Arc<dyn UpstreamClient>,
    strategy: Arc<dyn RoutingStrategy>,
}

impl std::fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("models", &self.models)
            .field("providers", &self.providers)
            .field("connections", &self.connections)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            models: None,
            providers: None,
            connections: Vec::new(),
            settings: RouterSettings::default(),
            clock: Arc::new(SystemClock),
            store: Arc::new(InMemoryStore::new()),
            estimator: Arc::new(HeuristicEstimator::new()),
            client: Arc::new(HttpUpstreamClient::new()),
            strategy: Arc::new(PriorityStrategy),
        }
    }
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn models_yaml(mut self, yaml: &str) -> Result<Self, RouterError> {
        self.models = Some(
            serde_yaml::from_str(yaml)
                .map_err(|e| RouterError::Configuration(format!("parsing models YAML: {e}")))?,
        );
        Ok(self)
    }

    pub fn providers_yaml(mut self, yaml: &str) -> Result<Self, RouterError> {
        self.providers = Some(
            serde_yaml::from_str(yaml)
                .map_err(|e| RouterError::Configuration(format!("parsing providers YAML: {e}")))?,
        );
        Ok(self)
    }

    pub fn models_bundle(mut self, bundle: ModelsBundle) -> Self {
        self.models = Some(bundle);
        self
    }

    pub fn providers_bundle(mut self, bundle: ProvidersBundle) -> Self {
        self.providers = Some(bundle);
        self
    }

    pub fn provider_connection(mut self, options: ProviderConnectionOptions) -> Self {
        self.connections.push(options);
        self
    }

    pub fn settings(mut self, settings: RouterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn token_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn upstream_client(mut self, client: Arc<dyn UpstreamClient>) -> Self {
        self.client = client;
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn RoutingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn build(self) -> Result<Router, RouterError> {
        let models = self
            .models
            .ok_or_else(|| RouterError::Configuration("no models bundle supplied".into()))?;
        let providers = self
            .providers
            .ok_or_else(|| RouterError::Configuration("no providers bundle supplied".into()))?;

        let catalog = config::build_catalog(models, providers, &self.connections)?;
        let tracker = RateLimitTracker::new(self.store);

        Ok(Router {
            ctx: Arc::new(DriverContext {
                catalog: Arc::new(catalog),
                tracker: Arc::new(tracker),
                settings: self.settings,
                clock: self.clock,
                estimator: self.estimator,
                client: self.client,
                strategy: self.strategy,
            }),
        })
    }
}
