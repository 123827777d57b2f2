//! Analysis endpoints. Each one answers 200 even when the model could not:
//! failed items carry the unavailable sentinel.

use analysis_orchestrator::BatchItem;
use axum::{extract::State, routing::post, Extension, Json, Router};
use insight_core::{Analysis, MatchDescriptor, PropSelection};
use serde::Deserialize;

use crate::{ApiResponse, AppError, AppState, RequestId};

/// Longest hunch forwarded to the model, in characters.
pub const MAX_HUNCH_CHARS: usize = 1000;

/// Matches accepted per batch request.
pub const MAX_BATCH_SIZE: usize = 10;

#[derive(Deserialize)]
pub struct AnalysisBody {
    #[serde(rename = "match")]
    pub match_info: MatchDescriptor,
    #[serde(default)]
    pub hunch: String,
    #[serde(default)]
    pub props: Vec<PropSelection>,
}

#[derive(Deserialize)]
pub struct BatchBody {
    pub matches: Vec<MatchDescriptor>,
    #[serde(default)]
    pub hunch: String,
}

#[derive(Deserialize)]
pub struct DailyBody {
    /// Today's slate; fetched from the scoreboard when omitted
    #[serde(default)]
    pub matches: Option<Vec<MatchDescriptor>>,
}

pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analysis", post(analyze_match))
        .route("/api/analysis/batch", post(analyze_batch))
        .route("/api/analysis/daily", post(daily_predictions))
}

fn truncate_hunch(hunch: &str) -> String {
    hunch.chars().take(MAX_HUNCH_CHARS).collect()
}

async fn analyze_match(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<AnalysisBody>,
) -> Json<ApiResponse<Analysis>> {
    let match_id = body.match_info.id.clone();
    let analysis = state
        .orchestrator
        .get_analysis(body.match_info, &truncate_hunch(&body.hunch), body.props)
        .await;
    tracing::info!(%request_id, match_id = %match_id, available = !analysis.is_unavailable(), "analysis served");
    Json(ApiResponse::success(analysis))
}

async fn analyze_batch(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<BatchBody>,
) -> Result<Json<ApiResponse<Vec<BatchItem>>>, AppError> {
    if body.matches.len() > MAX_BATCH_SIZE {
        return Err(AppError::bad_request(format!(
            "at most {} matches per batch, got {}",
            MAX_BATCH_SIZE,
            body.matches.len()
        ))
        .for_request(&request_id));
    }
    tracing::info!(%request_id, matches = body.matches.len(), "batch analysis started");

    let items = state
        .orchestrator
        .analyze_batch(&body.matches, &truncate_hunch(&body.hunch))
        .await;
    Ok(Json(ApiResponse::success(items)))
}

async fn daily_predictions(
    State(state): State<AppState>,
    Json(body): Json<DailyBody>,
) -> Json<ApiResponse<Vec<BatchItem>>> {
    let matches = match body.matches {
        Some(matches) => matches,
        None => state.matches.live_matches().await,
    };
    let items = state.orchestrator.daily_predictions(&matches).await;
    Json(ApiResponse::success(items))
}
