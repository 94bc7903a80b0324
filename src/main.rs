//! Daily Briefing Service: Binary Entrypoint
//! Loads configuration, wires the LLM client, one-liner cache and generator, and
//! serves the Axum router with Prometheus metrics.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use daily_briefing::clock::SystemClock;
use daily_briefing::config::{BriefingConfig, LlmConfig};
use daily_briefing::llm::build_client_from_config;
use daily_briefing::metrics::Metrics;
use daily_briefing::oneliner::FileOneLinerStore;
use daily_briefing::{create_router, AppState, BriefingGenerator};

const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_ONELINER_CACHE_DIR: &str = "cache/one_liners";

/// Compact logs by default; BRIEFING_LOG_JSON=1 switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("daily_briefing=info,warn"));
    let json = std::env::var("BRIEFING_LOG_JSON").is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = BriefingConfig::load()?;
    let llm_cfg = LlmConfig::load_default().context("loading llm config")?;
    let client = build_client_from_config(&llm_cfg)?;
    info!(
        provider = client.provider_name(),
        draft_model = %llm_cfg.draft_model,
        keywords_model = %llm_cfg.keywords_model,
        "llm client ready"
    );

    let cache_dir = std::env::var("ONELINER_CACHE_DIR")
        .unwrap_or_else(|_| DEFAULT_ONELINER_CACHE_DIR.to_string());
    let store = Arc::new(FileOneLinerStore::new(&cache_dir)?);

    let metrics = Metrics::init(cfg.hotspots.window_days)?;
    let generator = BriefingGenerator::new(client, store, Arc::new(SystemClock), cfg, &llm_cfg);
    let app = create_router(AppState::new(generator)).merge(metrics.router());

    let bind = std::env::var("BRIEFING_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, cache_dir = %cache_dir, "daily briefing service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
