//! # REST API Endpoints
//!
//! Read-only introspection for health checks and monitoring. Everything
//! here passes through to the gateway or the backend.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::backend::ModelInfo;
use crate::config::PublicConfig;
use crate::state::AppState;

/// Reported on `/health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `"healthy"` or `"unhealthy"`, from the backend's health signal.
    pub status: &'static str,
    pub model: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub active_connections: usize,
    pub model_info: ModelInfo,
    pub config: PublicConfig,
}

/// `GET /health`: Whether the generation backend is reachable.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let healthy = state.gateway.is_healthy().await;
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        model: state.gateway.model_name().to_owned(),
        version: VERSION,
    })
}

/// `GET /metrics`: Live connection count, model info and public config.
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        active_connections: state.gateway.connection_count(),
        model_info: state.gateway.model_info().await,
        config: state.config.public(),
    })
}
