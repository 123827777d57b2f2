use axum::{extract::State, routing::get, Json, Router};
use gemini_client::CredentialReport;
use insight_cache::LiveStats;
use serde::Serialize;

use crate::{ApiResponse, AppState};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache_enabled: bool,
    pub credentials_total: usize,
    pub credentials_available: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPoolResponse {
    pub total: usize,
    pub available: usize,
    pub credentials: Vec<CredentialReport>,
}

pub fn stats_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/stats", get(live_stats))
        .route("/api/keys", get(key_status))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = state.orchestrator.key_pool();
    Json(HealthResponse {
        status: "ok",
        cache_enabled: state.orchestrator.cache().is_enabled(),
        credentials_total: pool.len(),
        credentials_available: pool.available_count(),
    })
}

/// Global analysis count and the latest few entries.
async fn live_stats(State(state): State<AppState>) -> Json<ApiResponse<LiveStats>> {
    Json(ApiResponse::success(state.orchestrator.cache().live_stats().await))
}

async fn key_status(State(state): State<AppState>) -> Json<ApiResponse<KeyPoolResponse>> {
    let pool = state.orchestrator.key_pool();
    Json(ApiResponse::success(KeyPoolResponse {
        total: pool.len(),
        available: pool.available_count(),
        credentials: pool.snapshot(),
    }))
}
