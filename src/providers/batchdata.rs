//! BatchData Provider
//!
//! Speaks the BatchData property-skip-trace API: JSON POST with bearer
//! auth, results nested under `persons[0]`. Normalizes the nested shape
//! into the common [`TraceResponse`] contact lists.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::VendorConfig;
use crate::providers::client::HttpClient;
use crate::providers::types::{DebugPayload, FoundEmail, FoundPhone, TraceQuery, TraceResponse};
use crate::providers::{ProviderError, SkipTraceProvider};

pub const PROVIDER_ID: &str = "batchdata";

// ---------------------------------------------------------------------------
// BatchData API types (request)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct BdRequest {
    requests: Vec<BdLookup>,
}

#[derive(Debug, Serialize)]
struct BdLookup {
    #[serde(rename = "propertyAddress")]
    property_address: BdAddress,
    name: BdName,
}

#[derive(Debug, Serialize)]
struct BdAddress {
    street: String,
    city: String,
    state: String,
    zip: String,
}

#[derive(Debug, Serialize)]
struct BdName {
    first: String,
    last: String,
}

// ---------------------------------------------------------------------------
// BatchData API types (response)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BdResponse {
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    #[serde(default)]
    persons: Vec<BdPerson>,
}

#[derive(Debug, Deserialize)]
struct BdPerson {
    #[serde(default)]
    phones: Vec<BdPhone>,
    #[serde(default)]
    emails: Vec<BdEmail>,
    /// Person-level match score (0-100).
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BdPhone {
    number: String,
    #[serde(rename = "type")]
    phone_type: Option<String>,
    carrier: Option<String>,
    /// Per-number reachability score (0-100).
    score: Option<f64>,
    #[serde(default)]
    dnc: bool,
}

#[derive(Debug, Deserialize)]
struct BdEmail {
    email: String,
    #[serde(rename = "type")]
    email_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BdErrorBody {
    error: Option<BdErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct BdErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct BatchDataProvider {
    config: VendorConfig,
    http: HttpClient,
}

impl BatchDataProvider {
    pub fn new(config: VendorConfig, http: HttpClient) -> Result<Self, ProviderError> {
        if url::Url::parse(&config.endpoint).is_err() {
            return Err(ProviderError::NotConfigured("batchdata endpoint".into()));
        }
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("batchdata api_key".into()));
        }
        Ok(Self { config, http })
    }

    fn build_request(query: &TraceQuery) -> BdRequest {
        BdRequest {
            requests: vec![BdLookup {
                property_address: BdAddress {
                    street: query.street.clone(),
                    city: query.city.clone(),
                    state: query.state.clone(),
                    zip: query.zip.clone(),
                },
                name: BdName {
                    first: query.first_name.clone(),
                    last: query.last_name.clone(),
                },
            }],
        }
    }

    /// Flatten the nested `persons[0]` shape into the common contact lists.
    fn normalize(response: BdResponse, cost_cents: i64, debug: DebugPayload) -> TraceResponse {
        let request_id = response.request_id.clone();

        let (phones, emails) = match response.persons.into_iter().next() {
            Some(person) => {
                let person_score = person.score;
                let phones = person
                    .phones
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| FoundPhone {
                        number: p.number,
                        phone_type: p.phone_type,
                        carrier: p.carrier,
                        is_primary: i == 0,
                        is_do_not_call: p.dnc,
                        confidence: normalize_score(p.score.or(person_score)),
                        can_call: None,
                        is_quiet_hours: None,
                    })
                    .collect();
                let emails = person
                    .emails
                    .into_iter()
                    .enumerate()
                    .map(|(i, e)| FoundEmail {
                        address: e.email,
                        email_type: e.email_type,
                        is_primary: i == 0,
                        confidence: normalize_score(person_score),
                    })
                    .collect();
                (phones, emails)
            }
            None => (Vec::new(), Vec::new()),
        };

        TraceResponse {
            success: true,
            phones,
            emails,
            cost_cents,
            request_id,
            error: None,
            debug,
        }
    }
}

/// Map a vendor score (0-100 or already 0-1) into [0, 1]; absent → 0.
fn normalize_score(score: Option<f64>) -> f64 {
    match score {
        Some(s) if s > 1.0 => (s / 100.0).clamp(0.0, 1.0),
        Some(s) => s.clamp(0.0, 1.0),
        None => 0.0,
    }
}

impl SkipTraceProvider for BatchDataProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "BatchData"
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
                "authorization": "Bearer ***",
                "body": serde_json::to_value(&request).unwrap_or_default(),
            });

            debug!(provider = PROVIDER_ID, lead_id = %lead_id, "Querying BatchData");

            // Transport failures bubble up as ProviderError::Http; the
            // orchestrator treats them like any structured failure.
            let mut builder = self
                .http
                .inner()
                .post(&self.config.endpoint)
                .bearer_auth(&self.config.api_key)
                .json(&request);
            if let Some(secs) = self.config.timeout_secs {
                builder = builder.timeout(std::time::Duration::from_secs(secs));
            }
            let response = builder.send().await?;

            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if !status.is_success() {
                let detail: BdErrorBody = serde_json::from_str(&body).unwrap_or(BdErrorBody { error: None });
                let (code, message) = match detail.error {
                    Some(e) => (
                        e.code.unwrap_or_else(|| "unknown".into()),
                        e.message.unwrap_or_else(|| body.clone()),
                    ),
                    None => ("unknown".into(), body.clone()),
                };
                let debug_payload = DebugPayload {
                    request: request_snapshot,
                    response: serde_json::from_str(&body).unwrap_or_else(|_| json!(body.clone())),
                };
                return Ok(TraceResponse::failure(
                    format!("HTTP {} {}: {}", status.as_u16(), code, message),
                    debug_payload,
                ));
            }

            let raw: serde_json::Value =
                serde_json::from_str(&body).unwrap_or_else(|_| json!(body.clone()));
            let debug_payload = DebugPayload {
                request: request_snapshot,
                response: raw,
            };

            let parsed: BdResponse = match serde_json::from_str(&body) {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> BdResponse {
        serde_json::from_value(json!({
            "requestId": "bd-123",
            "persons": [{
                "score": 87,
                "phones": [
                    {"number": "2175550123", "type": "mobile", "carrier": "AT&T", "score": 95, "dnc": false},
                    {"number": "2175550999", "type": "landline", "dnc": true}
                ],
                "emails": [{"email": "owner@example.com", "type": "personal"}]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_nested_shape() {
        let resp = BatchDataProvider::normalize(sample_response(), 25, DebugPayload::default());
        assert!(resp.success);
        assert_eq!(resp.cost_cents, 25);
        assert_eq!(resp.request_id.as_deref(), Some("bd-123"));
        assert_eq!(resp.phones.len(), 2);
        assert_eq!(resp.emails.len(), 1);

        // First element tagged primary.
        assert!(resp.phones[0].is_primary);
        assert!(!resp.phones[1].is_primary);
        assert!(resp.emails[0].is_primary);
    }

    #[test]
    fn test_normalize_scores() {
        let resp = BatchDataProvider::normalize(sample_response(), 25, DebugPayload::default());
        // Per-phone score wins; falls back to person score.
        assert!((resp.phones[0].confidence - 0.95).abs() < 1e-9);
        assert!((resp.phones[1].confidence - 0.87).abs() < 1e-9);
        assert!((resp.emails[0].confidence - 0.87).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_dnc_flag() {
        let resp = BatchDataProvider::normalize(sample_response(), 25, DebugPayload::default());
        assert!(!resp.phones[0].is_do_not_call);
        assert!(resp.phones[1].is_do_not_call);
    }

    #[test]
    fn test_normalize_empty_persons() {
        let empty: BdResponse = serde_json::from_value(json!({"requestId": "bd-1"})).unwrap();
        let resp = BatchDataProvider::normalize(empty, 25, DebugPayload::default());
        assert!(resp.success);
        assert!(!resp.has_contacts());
    }

    #[test]
    fn test_normalize_score_ranges() {
        assert_eq!(normalize_score(None), 0.0);
        assert!((normalize_score(Some(95.0)) - 0.95).abs() < 1e-9);
        assert!((normalize_score(Some(0.5)) - 0.5).abs() < 1e-9);
        assert_eq!(normalize_score(Some(250.0)), 1.0);
    }

    #[test]
    fn test_new_requires_credentials() {
        let http = HttpClient::new();
        let missing_key = VendorConfig {
            endpoint: "https://api.batchdata.example/v1/skip-trace".into(),
            api_key: "".into(),
            cost_cents: 25,
            timeout_secs: None,
        };
        assert!(matches!(
            BatchDataProvider::new(missing_key, http.clone()),
            Err(ProviderError::NotConfigured(_))
        ));

        let missing_endpoint = VendorConfig {
            endpoint: "".into(),
            api_key: "key".into(),
            cost_cents: 25,
            timeout_secs: None,
        };
        assert!(matches!(
            BatchDataProvider::new(missing_endpoint, http),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_request_shape() {
        let query = TraceQuery {
            lead_id: "lead-1".into(),
            first_name: "John".into(),
            last_name: "Smith".into(),
            street: "123 Main St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            zip: "62704".into(),
        };
        let body = serde_json::to_value(BatchDataProvider::build_request(&query)).unwrap();
        assert_eq!(body["requests"][0]["propertyAddress"]["street"], "123 Main St");
        assert_eq!(body["requests"][0]["name"]["last"], "Smith");
    }
}
