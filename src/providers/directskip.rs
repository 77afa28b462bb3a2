//! DirectSkip Provider
//!
//! Speaks the DirectSkip lookup API: JSON POST authenticated with a
//! custom `X-Api-Key` header, flat `phones[]` / `emails[]` response shape
//! with no match scores (confidence is reported as 0).

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::VendorConfig;
use crate::providers::client::HttpClient;
use crate::providers::types::{DebugPayload, FoundEmail, FoundPhone, TraceQuery, TraceResponse};
use crate::providers::{ProviderError, SkipTraceProvider};

pub const PROVIDER_ID: &str = "directskip";

// ---------------------------------------------------------------------------
// DirectSkip API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct DsRequest {
    #[serde(rename = "firstName")]
    first_name: String,
    #[serde(rename = "lastName")]
    last_name: String,
    address: String,
    city: String,
    state: String,
    zip: String,
}

#[derive(Debug, Deserialize)]
struct DsResponse {
    id: Option<String>,
    #[serde(default)]
    phones: Vec<DsPhone>,
    #[serde(default)]
    emails: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DsPhone {
    phone: String,
    #[serde(rename = "lineType")]
    line_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct DirectSkipProvider {
    config: VendorConfig,
    http: HttpClient,
}

impl DirectSkipProvider {
    pub fn new(config: VendorConfig, http: HttpClient) -> Result<Self, ProviderError> {
        if url::Url::parse(&config.endpoint).is_err() {
            return Err(ProviderError::NotConfigured("directskip endpoint".into()));
        }
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("directskip api_key".into()));
        }
        Ok(Self { config, http })
    }

    fn build_request(query: &TraceQuery) -> DsRequest {
        DsRequest {
            first_name: query.first_name.clone(),
            last_name: query.last_name.clone(),
            address: query.street.clone(),
            city: query.city.clone(),
            state: query.state.clone(),
            zip: query.zip.clone(),
        }
    }

    /// The flat shape maps straight onto the common lists; DirectSkip
    /// supplies no scores, so confidence stays 0.
    fn normalize(response: DsResponse, cost_cents: i64, debug: DebugPayload) -> TraceResponse {
        let phones = response
            .phones
            .into_iter()
            .enumerate()
            .map(|(i, p)| FoundPhone {
                number: p.phone,
                phone_type: p.line_type,
                carrier: None,
                is_primary: i == 0,
                is_do_not_call: false,
                confidence: 0.0,
                can_call: None,
                is_quiet_hours: None,
            })
            .collect();

        let emails = response
            .emails
            .into_iter()
            .enumerate()
            .map(|(i, address)| FoundEmail {
                address,
                email_type: None,
                is_primary: i == 0,
                confidence: 0.0,
            })
            .collect();

        TraceResponse {
            success: true,
            phones,
            emails,
            cost_cents,
            request_id: response.id,
            error: None,
            debug,
        }
    }
}

impl SkipTraceProvider for DirectSkipProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "DirectSkip"
    }

    fn cost_cents(&self) -> i64 {
        self.config.cost_cents
    }

    fn skip_trace(
        &self,
        query: &TraceQuery,
    ) -> Pin<Box<dyn Future<Output = Result<TraceResponse, ProviderError>> + Send + '_>> {
        let request = Self::build_request(query);
        let lead_id = query.lead_id.clone();

        Box::pin(async move {
            let request_snapshot = json!({
                "url": self.config.endpoint,
                "x-api-key": "***",
                "body": serde_json::to_value(&request).unwrap_or_default(),
            });

            debug!(provider = PROVIDER_ID, lead_id = %lead_id, "Querying DirectSkip");

            let mut builder = self
                .http
                .inner()
                .post(&self.config.endpoint)
                .header("X-Api-Key", &self.config.api_key)
                .json(&request);
            if let Some(secs) = self.config.timeout_secs {
                builder = builder.timeout(std::time::Duration::from_secs(secs));
            }
            let response = builder.send().await?;

            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            let raw: serde_json::Value =
                serde_json::from_str(&body).unwrap_or_else(|_| json!(body.clone()));
            let debug_payload = DebugPayload {
                request: request_snapshot,
                response: raw.clone(),
            };

            if !status.is_success() {
                // DirectSkip reports errors as {"status": "...", "message": "..."}.
                let code = raw["status"].as_str().unwrap_or("unknown").to_string();
                let message = raw["message"].as_str().unwrap_or(&body).to_string();
                return Ok(TraceResponse::failure(
                    format!("HTTP {} {}: {}", status.as_u16(), code, message),
                    debug_payload,
                ));
            }

            let parsed: DsResponse = match serde_json::from_str(&body) {
                Ok(p) => p,
                Err(e) => {
                    return Ok(TraceResponse::failure(
                        format!("HTTP {} parse: {}", status.as_u16(), e),
                        debug_payload,
                    ));
                }
            };

            Ok(Self::normalize(parsed, self.config.cost_cents, debug_payload))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
