//! Minimal CLI demonstrating `llm_router_core`: loads a models/providers
//! YAML pair, routes one prompt, and prints the provider that answered it.
//!
//! Gated behind the `demo` feature so a library consumer never pulls in
//! `tracing-subscriber` unless they explicitly want this binary, keeping
//! the default build lean.

use std::env;
use std::sync::Arc;

use llm_router_core::{LeastUsedStrategy, RouterBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let models_path = args.next().unwrap_or_else(|| "demos/models.example.yaml".into());
    let providers_path = args.next().unwrap_or_else(|| "demos/providers.example.yaml".into());
    let model = args.next().unwrap_or_else(|| "best".into());
    let prompt = args.next().unwrap_or_else(|| "Say hello in one sentence.".into());

    let models_yaml = std::fs::read_to_string(&models_path)?;
    let providers_yaml = std::fs::read_to_string(&providers_path)?;

    let router = RouterBuilder::new()
        .models_yaml(&models_yaml)?
        .providers_yaml(&providers_yaml)?
        .strategy(Arc::new(LeastUsedStrategy::default()))
        .build()?;

    let request = serde_json::json!({
        "messages": [{"role": "user", "content": prompt}],
    });

    match router.route(&model, request).await {
        Ok(response) => {
            eprintln!(
                "served by {} ({}), {} retr{}",
                response.provider,
                response.model_id,
                response.retry_count,
                if response.retry_count == 1 { "y" } else { "ies" }
            );
            println!("{}", serde_json::to_string_pretty(&response.body)?);
        }
        Err(err) => {
            eprintln!("routing failed: {err}");
            std::process::exit(1);
        }
    }

    Ok(())
}
