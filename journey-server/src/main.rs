use anyhow::{Context, Result};
use chronolens::cache::{SqliteStore, TimelineCache};
use chronolens::config::{load_config, new_runtime_config, ChronolensConfig};
use chronolens::resilience::{ResilientCall, RetryPolicy};
use chronolens::scheduler::PregenerationScheduler;
use chronolens::GenerationPipeline;
use journey_server::gemini::api::GeminiClient;
use journey_server::gemini::GeminiModels;
use journey_server::{create_router, ApiState, GeminiService};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "journey_server=info,chronolens=info".into()),
        )
        .init();

    info!("Journey server starting...");

    let config = match std::env::var("CHRONOLENS_CONFIG") {
        Ok(path) => load_config(Path::new(&path))?,
        Err(_) => ChronolensConfig::default(),
    };

    let runtime = new_runtime_config();
    if !runtime.read().unwrap().has_api_key() {
        warn!("GEMINI_API_KEY not set; generation will fail until a key is provided");
    }

    let models = GeminiModels::from_env();
    info!(
        text_model = %models.text,
        image_model = %models.image,
        speech_model = %models.speech,
        cache_path = %config.cache.path.display(),
        port = config.server.port,
        "Configuration loaded"
    );

    // Artifact cache
    let store = SqliteStore::open(&config.cache.path)
        .context("Failed to initialize artifact cache")?;
    let cache = TimelineCache::new(Arc::new(store));
    info!("Artifact cache initialized");

    let service = GeminiService::new(
        GeminiClient::new(runtime.clone()),
        models,
        config.pipeline.event_count,
        config.pipeline.panoramic,
    );
    let pipeline = GenerationPipeline::new(
        Arc::new(service),
        cache,
        ResilientCall::with_policy(RetryPolicy::from(&config.retry)),
        config.pipeline.clone(),
    );
    let scheduler = PregenerationScheduler::new(pipeline, config.pregeneration.catalog());

    if config.pregeneration.enabled {
        let background = scheduler.clone();
        tokio::spawn(async move {
            let summary = background.start().await;
            info!(
                cached = summary.already_cached,
                generated = summary.generated,
                failed = summary.failed,
                "Initial pregeneration complete"
            );
        });
    }

    // Start HTTP API server
    let api_state = ApiState::new(
        scheduler,
        runtime,
        config.lazy.clone(),
        config.pregeneration.enabled,
    );
    let router = create_router(api_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
        .await
        .context("Failed to bind journey API port")?;
    info!(port = config.server.port, "Journey API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Journey API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Journey server stopped");

    Ok(())
}
