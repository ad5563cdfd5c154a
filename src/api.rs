// src/api.rs
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::ingest::config::FeedConfig;
use crate::ingest::relay::Transport;
use crate::ingest::Aggregator;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

impl AppState {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator: Arc::new(aggregator),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/feed", get(feed))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Full service surface: `/health`, `/feed` and `/metrics`.
/// The recorder goes in before the aggregator registers its metric descriptions.
pub fn service(cfg: &FeedConfig, transport: Arc<dyn Transport>) -> anyhow::Result<Router> {
    let metrics = Metrics::init()?;
    let aggregator = Aggregator::from_config(cfg, transport)?;
    Ok(router(AppState::new(aggregator)).merge(metrics.router()))
}

/// One full aggregation run per request.
async fn feed(State(state): State<AppState>) -> Response {
    match state.aggregator.get_aggregated_feed().await {
        Ok(fixtures) => Json(fixtures).into_response(),
        Err(e) => {
            warn!(error = %e, "feed request failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
