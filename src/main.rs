use clap::Parser;
use std::sync::Arc;

mod cache;
mod config;
mod error;
mod handlers;
mod logging;
mod metrics;
mod models;
mod prompts;
mod questions;
mod sse;
mod state;
mod upstream;

use crate::cache::TtlCache;
use crate::config::Args;
use crate::state::AppState;
use crate::upstream::UpstreamClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(args.log_format);
    metrics::init();

    let http = reqwest::Client::builder()
        .timeout(args.upstream_timeout())
        .build()?;
    let upstream = UpstreamClient::new(
        http,
        args.upstream_url.clone(),
        args.api_key(),
        args.model.clone(),
    );
    if !upstream.is_configured() {
        tracing::warn!("OPENAI_API_KEY is not set, upstream routes will answer 500");
    }

    let state = Arc::new(AppState::new(
        upstream,
        TtlCache::new(args.cache_ttl()),
        args.cache_key,
    ));
    let app = handlers::router(state.clone(), args.max_body_bytes);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        addr = %addr,
        upstream = state.upstream.base_url(),
        model = state.upstream.model(),
        cache_ttl_secs = state.cache.ttl().as_secs(),
        cache_key = ?args.cache_key,
        "page reader gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
