use crate::batch::BatchSummary;
use crate::merge::WindowSummary;
use crate::resilience::BreakerState;
use crate::scheduler::Orchestrator;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

/// Shared state for the status API
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub start_time: std::time::Instant,
}

#[derive(Debug, Serialize)]
pub struct BreakerInfo {
    pub backend: String,
    pub state: BreakerState,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub active_group_locks: usize,
    pub extraction_slots_available: usize,
    pub extraction_slots_total: usize,
    pub breakers: Vec<BreakerInfo>,
}

#[derive(Debug, Serialize)]
pub struct BatchesResponse {
    pub group_id: String,
    pub batches: Vec<BatchSummary>,
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let resilience = state.orchestrator.resilience();
    let breakers = resilience
        .breaker_states()
        .into_iter()
        .map(|(backend, state)| BreakerInfo { backend, state })
        .collect();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_group_locks: state.orchestrator.locks().active(),
        extraction_slots_available: resilience.limiter().available(),
        extraction_slots_total: resilience.limiter().capacity(),
        breakers,
    })
}

/// GET /api/groups/:group_id/summary
pub async fn get_window_summary(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<String>,
) -> Result<Json<WindowSummary>, ApiError> {
    let summary = state
        .orchestrator
        .get_window_summary(&group_id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(summary))
}

/// GET /api/groups/:group_id/batches
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<String>,
) -> Result<Json<BatchesResponse>, ApiError> {
    let batches = state
        .orchestrator
        .batch_summaries(&group_id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(BatchesResponse { group_id, batches }))
}

#[derive(Debug)]
pub enum ApiError {
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InternalError(msg) => {
                tracing::error!(error = %msg, "API request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
