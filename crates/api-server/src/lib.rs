//! HTTP surface for the analysis orchestrator.

use analysis_orchestrator::{AnalysisOrchestrator, ContextAssembler};
use anyhow::Context;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    Json, Router,
};
use gemini_client::{Dispatcher, GeminiClient, KeyPool};
use insight_cache::AnalysisCache;
use insight_core::{Clock, SystemClock};
use serde::Serialize;
use sports_feeds::{MatchSource, PrizePicksClient, ProjectionSource, ScoreboardClient};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod analysis_routes;
pub mod config;
pub mod match_routes;
pub mod request_id;
pub mod security_headers;
pub mod stats_routes;

pub use config::InsightConfig;
pub use request_id::RequestId;

/// Extra transport time on top of the dispatcher's own per-call deadline.
const TRANSPORT_SLACK: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AnalysisOrchestrator>,
    pub matches: Arc<dyn MatchSource>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Handler error rendered as an `ApiResponse` with `success: false`.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    request_id: Option<RequestId>,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            request_id: None,
        }
    }

    /// Tag the failure with the call it belongs to.
    pub fn for_request(mut self, request_id: &RequestId) -> Self {
        self.request_id = Some(request_id.clone());
        self
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.into().to_string(),
            request_id: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = self.request_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-");
        if self.status.is_server_error() {
            tracing::error!(request_id, "request failed: {}", self.message);
        } else {
            tracing::warn!(request_id, status = self.status.as_u16(), "request rejected: {}", self.message);
        }
        (self.status, Json(ApiResponse::<()>::error(self.message))).into_response()
    }
}

/// Logs to stdout, filtered by `RUST_LOG` (default `info`). Set
/// `RUST_LOG_FORMAT=json` for structured output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}

/// Wire the production collaborators from configuration.
pub async fn build_state(config: &InsightConfig) -> AppState {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let pool = Arc::new(KeyPool::new(
        config.api_keys.clone(),
        config.key_pool.clone(),
        clock.clone(),
    ));
    let model = Arc::new(GeminiClient::new(
        config.model.clone(),
        config.base_url.clone(),
        config.dispatch.request_timeout + TRANSPORT_SLACK,
    ));
    let dispatcher = Dispatcher::new(pool, model, config.dispatch.clone());

    let cache = AnalysisCache::connect(config.cache_database_url.as_deref()).await;
    let projections: Arc<dyn ProjectionSource> = Arc::new(PrizePicksClient::new(
        config.projections_url.clone(),
        config.projections_ttl,
    ));
    let matches: Arc<dyn MatchSource> = Arc::new(ScoreboardClient::new(config.scoreboard_url.clone()));
    let context = ContextAssembler::new(Some(projections), cache.clone()).with_matches(matches.clone());

    let orchestrator = AnalysisOrchestrator::new(
        dispatcher,
        context,
        cache,
        clock,
        config.orchestrator.clone(),
    );

    AppState {
        orchestrator: Arc::new(orchestrator),
        matches,
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .merge(analysis_routes::analysis_routes())
        .merge(match_routes::match_routes())
        .merge(stats_routes::stats_routes())
        .with_state(state)
        .layer(middleware::from_fn(security_headers::security_headers_middleware))
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http",
                method = %request.method(),
                uri = %request.uri(),
                request_id = tracing::field::Empty,
            )
        }))
        .layer(cors)
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = InsightConfig::from_env().context("failed to load configuration")?;
    tracing::info!(
        keys = config.api_keys.len(),
        cache = config.cache_database_url.is_some(),
        "starting insight api server"
    );

    let state = build_state(&config).await;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("shutdown signal received");
}
