use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::enrich::EnrichError;
use crate::guardrails::GuardrailError;

/// Unified application error type for the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Budget paused: {0}")]
    BudgetPaused(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structured error body: `{"error": {"code", "message"}}`.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BudgetPaused(_) | Self::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::BudgetPaused(_) => "budget_paused",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Configuration(_) => "configuration_error",
            Self::Database(_) => "database_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        tracing::error!(error = %err, "Database error");
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<EnrichError> for AppError {
    fn from(err: EnrichError) -> Self {
        match &err {
            EnrichError::LeadNotFound(_) => Self::NotFound(err.to_string()),
            EnrichError::Configuration(_) => Self::Configuration(err.to_string()),
            EnrichError::Guardrail(g) => match g {
                GuardrailError::BudgetPaused { .. } => Self::BudgetPaused(err.to_string()),
                GuardrailError::QuotaExceeded { .. } => Self::QuotaExceeded(err.to_string()),
                GuardrailError::CircuitOpen => Self::CircuitOpen(err.to_string()),
                GuardrailError::Database(_) => Self::Database(err.to_string()),
            },
            EnrichError::Database(_) => Self::Database(err.to_string()),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, AppError>;
