use axum::{extract::State, routing::get, Json, Router};
use insight_core::MatchDescriptor;

use crate::{ApiResponse, AppState};

pub fn match_routes() -> Router<AppState> {
    Router::new().route("/api/matches", get(live_matches))
}

/// Current slate across every scoreboard feed that answered.
async fn live_matches(State(state): State<AppState>) -> Json<ApiResponse<Vec<MatchDescriptor>>> {
    let matches = state.matches.live_matches().await;
    tracing::debug!(count = matches.len(), "serving live matches");
    Json(ApiResponse::success(matches))
}
