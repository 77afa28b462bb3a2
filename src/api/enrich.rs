//! Single-lead enrichment handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::enrich::{EnrichmentOptions, EnrichmentOutcome};
use crate::error::{ApiResult, AppError};
use crate::providers::types::{FoundEmail, FoundPhone};
use crate::store::contacts;
use crate::AppState;

/// POST /enrich/{lead_id}
///
/// Run one lead through the orchestrator. The body is optional; an empty
/// body uses the configured defaults.
pub async fn enrich_lead(
    State(state): State<AppState>,
    Path(lead_id): Path<String>,
    body: String,
) -> ApiResult<Json<EnrichmentOutcome>> {
    let options: EnrichmentOptions = if body.trim().is_empty() {
        EnrichmentOptions::default()
    } else {
        serde_json::from_str(&body)
            .map_err(|e| AppError::BadRequest(format!("invalid options body: {e}")))?
    };

    tracing::info!(
        lead_id = %lead_id,
        force_refresh = options.force_refresh,
        provider = options.provider.as_deref().unwrap_or("default"),
        "Enrichment requested"
    );

    let outcome = state.orchestrator.enrich(&lead_id, &options).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
pub struct ContactsResponse {
    pub lead_id: String,
    pub phones: Vec<FoundPhone>,
    pub emails: Vec<FoundEmail>,
}

/// GET /enrich/{lead_id}/contacts
///
/// Stored contacts from the normalized tables.
pub async fn get_contacts(
    State(state): State<AppState>,
    Path(lead_id): Path<String>,
) -> ApiResult<Json<ContactsResponse>> {
    let (phones, emails) = contacts::load_contacts(&state.db, &lead_id)?;
    Ok(Json(ContactsResponse {
        lead_id,
        phones,
        emails,
    }))
}
