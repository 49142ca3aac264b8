//! JSON adapters over the engine
//!
//! Every behavior lives in `engram-core`; handlers only translate
//! between HTTP and engine calls, and map typed errors onto status
//! codes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use engram_core::{EngineError, MemoryInput, RecallOptions};

use crate::state::AppState;
use crate::ws;

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/stats", get(stats))
        .route("/memories", post(remember))
        .route("/memories/{id}", get(get_memory))
        .route("/search", post(search))
        .route("/consolidate", post(consolidate))
        .route("/control/status", get(control_status))
        .route("/control/pause", post(pause))
        .route("/control/resume", post(resume))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

/// Engine errors rendered as `{error}` JSON with a matching status
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound(_) | EngineError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Paused => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::StorageBlocked(_) => StatusCode::INSUFFICIENT_STORAGE,
            EngineError::BulkDeleteSafety { .. } => StatusCode::CONFLICT,
            EngineError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            EngineError::ImportRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// HANDLERS
// ============================================================================

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": engram_core::VERSION,
        "uptimeSecs": state.start_time.elapsed().as_secs(),
        "size": state.engine.size_info(),
    }))
}

#[derive(Debug, Deserialize)]
struct ProjectQuery {
    project: Option<String>,
}

async fn stats(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<engram_core::MemoryStats>> {
    let stats = state.engine.get_stats(query.project.as_deref())?;
    Ok(Json(stats))
}

async fn remember(
    State(state): State<AppState>,
    Json(input): Json<MemoryInput>,
) -> ApiResult<(StatusCode, Json<engram_core::Memory>)> {
    let memory = state.engine.remember(input)?;
    Ok((StatusCode::CREATED, Json(memory)))
}

async fn get_memory(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<engram_core::Memory>> {
    Ok(Json(state.engine.get_memory(id)?))
}

async fn search(
    State(state): State<AppState>,
    Json(options): Json<RecallOptions>,
) -> ApiResult<Json<Vec<engram_core::SearchHit>>> {
    Ok(Json(state.engine.recall(options)?))
}

#[derive(Debug, Deserialize, Default)]
struct ConsolidateQuery {
    #[serde(default)]
    force: bool,
    #[serde(default)]
    dry_run: bool,
}

async fn consolidate(
    State(state): State<AppState>,
    Query(query): Query<ConsolidateQuery>,
) -> ApiResult<Json<engram_core::ConsolidationReport>> {
    Ok(Json(state.engine.consolidate(query.force, query.dry_run)?))
}

async fn control_status(State(state): State<AppState>) -> Json<engram_core::ControlStatus> {
    Json(state.engine.control_status())
}

async fn pause(State(state): State<AppState>) -> Json<engram_core::ControlStatus> {
    state.engine.pause();
    Json(state.engine.control_status())
}

async fn resume(State(state): State<AppState>) -> Json<engram_core::ControlStatus> {
    state.engine.resume();
    Json(state.engine.control_status())
}
