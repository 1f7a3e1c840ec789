//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub store_backend: String,
    pub generations: usize,
    pub active_generations: usize,
}

/// Readiness check endpoint.
pub async fn ready(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let store = state.engine.store();
    Json(ReadinessResponse {
        status: "ready".to_string(),
        store_backend: store.backend_name().to_string(),
        generations: store.len().await,
        active_generations: store.list_active().await.len(),
    })
}
