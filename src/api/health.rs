use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::cache::CacheStatsSnapshot;
use crate::guardrails::GuardrailSnapshot;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub environment: String,
    pub providers: Vec<String>,
    pub guardrails: GuardrailSnapshot,
    pub cache: CacheStatsSnapshot,
}

/// GET /health
///
/// Overall status plus the guardrail and cache snapshots operators watch
/// during a batch run.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let guardrails = state.guardrails.snapshot();
    let status = if guardrails.budget.paused {
        "budget_paused"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        environment: state.config.environment.clone(),
        providers: state.registry.ids().to_vec(),
        guardrails,
        cache: state.cache.stats(),
    })
}
