pub mod analytics;
pub mod enrich;
pub mod health;
pub mod runs;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

/// Build the full API router.
///
/// Route layout:
/// ```text
/// /health                      GET
/// /enrich/{lead_id}            POST   single-lead enrichment
/// /enrich/{lead_id}/contacts   GET    stored contacts
/// /runs                        POST   create + start a batch run
/// /runs                        GET    list runs
/// /runs/{id}                   GET    run status + item counts
/// /runs/{id}/pause             POST   set the soft-pause flag
/// /runs/{id}/resume            POST   clear it
/// /runs/{id}/report            GET    completion report (JSON)
/// /runs/{id}/artifact          GET    enrichment CSV artifact
/// /analytics/quota             GET    per-provider daily quota usage
/// /analytics/costs             GET    daily cost totals per provider
/// ```
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/enrich/{lead_id}", post(enrich::enrich_lead))
        .route("/enrich/{lead_id}/contacts", get(enrich::get_contacts))
        .route("/runs", post(runs::create_run))
        .route("/runs", get(runs::list_runs))
        .route("/runs/{id}", get(runs::get_run))
        .route("/runs/{id}/pause", post(runs::pause_run))
        .route("/runs/{id}/resume", post(runs::resume_run))
        .route("/runs/{id}/report", get(runs::get_report))
        .route("/runs/{id}/artifact", get(runs::get_artifact))
        .route("/analytics/quota", get(analytics::quota_usage))
        .route("/analytics/costs", get(analytics::daily_costs))
        .with_state(state)
}
