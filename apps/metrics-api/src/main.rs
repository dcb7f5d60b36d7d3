//! Metrics API server - read-only views over collected audit samples
//!
//! Provides REST endpoints for:
//! - Raw sample series
//! - Rolling-average series
//! - Per-metric summary statistics

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use metrics_store::MetricStore;

mod error;
mod handlers;

fn router(store: MetricStore) -> Router {
    // CORS configuration for dashboard clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/series", get(handlers::raw_series))
        .route("/api/rolling", get(handlers::rolling_series))
        .route("/api/stats", get(handlers::summary_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("metrics_api=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:pagewatch.db?mode=rwc".to_string());

    info!("Initializing metrics API...");
    let store = MetricStore::connect(&database_url).await?;
    let app = router(store);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics API on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
