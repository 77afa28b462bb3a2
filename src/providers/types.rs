//! Common request/response types shared by every skip-trace vendor adapter.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// The normalized lookup a vendor adapter receives. Adapters own the
/// translation into their vendor's wire shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceQuery {
    pub lead_id: String,
    pub first_name: String,
    pub last_name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

/// A phone number found by a provider, normalized to the common shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoundPhone {
    pub number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    pub is_primary: bool,
    pub is_do_not_call: bool,
    /// Vendor-supplied match confidence in [0, 1]; 0 when the vendor
    /// provides no score.
    pub confidence: f64,
    /// DNC-compliance annotation, set only when the checker is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_call: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_quiet_hours: Option<bool>,
}

/// An email address found by a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoundEmail {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_type: Option<String>,
    pub is_primary: bool,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Sanitized request/response snapshots kept for vendor-schema debugging.
/// Secrets are masked before these are persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugPayload {
    pub request: serde_json::Value,
    pub response: serde_json::Value,
}

/// Uniform adapter result.
///
/// Ordinary vendor HTTP errors come back as `success: false` with a
/// structured `error` string; adapters only return `Err(..)` for
/// transport-level failures (timeout, connection refused).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceResponse {
    pub success: bool,
    pub phones: Vec<FoundPhone>,
    pub emails: Vec<FoundEmail>,
    pub cost_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub debug: DebugPayload,
}

impl TraceResponse {
    /// A structured failure (no contacts, no cost).
    pub fn failure(error: impl Into<String>, debug: DebugPayload) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            debug,
            ..Default::default()
        }
    }

    /// Whether any usable contact data was returned.
    pub fn has_contacts(&self) -> bool {
        !self.phones.is_empty() || !self.emails.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_has_no_contacts() {
        let resp = TraceResponse::failure("HTTP 500: boom", DebugPayload::default());
        assert!(!resp.success);
        assert!(!resp.has_contacts());
        assert_eq!(resp.cost_cents, 0);
        assert_eq!(resp.error.as_deref(), Some("HTTP 500: boom"));
    }

    #[test]
    fn test_has_contacts() {
        let resp = TraceResponse {
            success: true,
            phones: vec![FoundPhone {
                number: "5550100".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(resp.has_contacts());
    }
}
