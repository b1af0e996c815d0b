//! cssprune API Server
//! Unused CSS pruning and critical CSS extraction service

mod analyzer;
mod config;
mod critical;
mod error;
mod handlers;
mod inliner;
mod pruner;
mod selector_parser;
mod snapshot;
mod token_extractor;
mod usage_matcher;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppState;

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/analyze", post(handlers::analyze))
        .route("/api/v1/prune", post(handlers::prune))
        .route("/api/v1/prune/inline", post(handlers::prune_inline))
        .route("/api/v1/critical", post(handlers::critical))
        .route("/api/v1/critical/inline", post(handlers::critical_inline))
        .route("/api/v1/critical/inline/site", post(handlers::critical_inline_site))
        .route("/api/v1/stylesheets/inline", post(handlers::inline_stylesheets))
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cssprune_api=debug,info".into()),
        ))
        .init();

    // Load config
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("Starting cssprune API on {}", config.address());

    if config.api_key.is_none() {
        tracing::warn!("API_KEY is not set, operation endpoints will refuse requests");
    }

    let state = AppState::from_config(&config).context("Failed to compile safelist")?;
    tracing::info!(
        "Extractor: {}, {} safelist patterns, critical CSS budget {} bytes",
        state.extractor.as_str(),
        state.matcher.safelist().patterns().len(),
        state.critical_budget
    );

    let app = router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.address())
        .await
        .with_context(|| format!("Failed to bind {}", config.address()))?;

    tracing::info!("Server listening on http://{}", config.address());

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
