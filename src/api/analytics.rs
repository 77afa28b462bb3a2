//! Quota and cost analytics handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::ApiResult;
use crate::guardrails::QuotaUsage;
use crate::store::audit::{self, DailyCost};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub providers: Vec<QuotaUsage>,
}

/// GET /analytics/quota
pub async fn quota_usage(State(state): State<AppState>) -> ApiResult<Json<QuotaResponse>> {
    let providers = state.guardrails.quota_usage()?;
    Ok(Json(QuotaResponse { providers }))
}

#[derive(Debug, Serialize)]
pub struct CostsResponse {
    pub days: Vec<DailyCost>,
}

/// GET /analytics/costs
pub async fn daily_costs(State(state): State<AppState>) -> ApiResult<Json<CostsResponse>> {
    let days = audit::daily_costs(&state.db)?;
    Ok(Json(CostsResponse { days }))
}
