//! Batch run handlers: create, inspect, pause/resume, report, artifact.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::batch::{self, BatchRun, ItemCounts, RunStatus};
use crate::error::{ApiResult, AppError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    #[serde(default)]
    pub name: String,
    pub lead_ids: Vec<String>,
    /// Overrides the configured auto-pause interval for this run.
    #[serde(default)]
    pub auto_pause_items: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    #[serde(flatten)]
    pub run: BatchRun,
    pub items: ItemCounts,
}

/// POST /runs
///
/// Create a run from a list of lead ids and start its driver loop.
pub async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<CreateRunRequest>,
) -> ApiResult<Json<RunResponse>> {
    if request.lead_ids.is_empty() {
        return Err(AppError::BadRequest("lead_ids must not be empty".into()));
    }

    let auto_pause = request
        .auto_pause_items
        .unwrap_or(state.config.batch.auto_pause_items);
    let run = batch::create_run(&state.db, &request.name, &request.lead_ids, auto_pause)?;

    tracing::info!(run_id = %run.id, items = run.total_count, "Batch run created");
    state.spawn_run_driver(&run.id);

    let items = batch::item_counts(&state.db, &run.id)?;
    Ok(Json(RunResponse { run, items }))
}

/// GET /runs
pub async fn list_runs(State(state): State<AppState>) -> ApiResult<Json<Vec<BatchRun>>> {
    Ok(Json(batch::list_runs(&state.db)?))
}

/// GET /runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunResponse>> {
    let run = require_run(&state, &id)?;
    let items = batch::item_counts(&state.db, &id)?;
    Ok(Json(RunResponse { run, items }))
}

/// POST /runs/{id}/pause
///
/// Set the soft-pause flag; the driver stops between items and keeps
/// polling.
pub async fn pause_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunResponse>> {
    let run = require_run(&state, &id)?;
    if matches!(run.status, RunStatus::Completed | RunStatus::Failed) {
        return Err(AppError::BadRequest(format!(
            "run already {}",
            run.status.as_str()
        )));
    }

    batch::set_pause_requested(&state.db, &id, true)?;
    tracing::info!(run_id = %id, "Soft pause requested");

    let run = require_run(&state, &id)?;
    let items = batch::item_counts(&state.db, &id)?;
    Ok(Json(RunResponse { run, items }))
}

/// POST /runs/{id}/resume
///
/// Clear the soft-pause flag. If the driver loop is no longer alive
/// (process restarted while paused), a fresh one is spawned; the queue
/// resumes exactly where it left off.
pub async fn resume_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunResponse>> {
    let run = require_run(&state, &id)?;
    if matches!(run.status, RunStatus::Completed | RunStatus::Failed) {
        return Err(AppError::BadRequest(format!(
            "run already {}",
            run.status.as_str()
        )));
    }

    batch::set_pause_requested(&state.db, &id, false)?;
    if !state.has_live_driver(&id) {
        state.spawn_run_driver(&id);
    }
    tracing::info!(run_id = %id, "Run resumed");

    let run = require_run(&state, &id)?;
    let items = batch::item_counts(&state.db, &id)?;
    Ok(Json(RunResponse { run, items }))
}

/// GET /runs/{id}/report
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let run = require_run(&state, &id)?;
    let report = run
        .report_json
        .ok_or_else(|| AppError::NotFound(format!("run {id} has no report yet")))?;
    let value: serde_json::Value = serde_json::from_str(&report)
        .map_err(|e| AppError::Internal(format!("corrupt report: {e}")))?;
    Ok(Json(value))
}

/// GET /runs/{id}/artifact
///
/// The enrichment CSV produced at completion.
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let run = require_run(&state, &id)?;
    let path = run
        .artifact_path
        .ok_or_else(|| AppError::NotFound(format!("run {id} has no artifact yet")))?;
    let csv = std::fs::read_to_string(&path)
        .map_err(|e| AppError::Internal(format!("artifact unreadable: {e}")))?;

    Ok(([(header::CONTENT_TYPE, "text/csv")], csv))
}

fn require_run(state: &AppState, id: &str) -> Result<BatchRun, AppError> {
    batch::get_run(&state.db, id)?
        .ok_or_else(|| AppError::NotFound(format!("run not found: {id}")))
}
