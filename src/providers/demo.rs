//! Synthetic demo provider.
//!
//! Returns deterministic, clearly-fake contact data derived from a hash of
//! (lead_id, address). Never touches the network. Registration is gated on
//! both demo flags being set and the environment not being production, so
//! this adapter is unreachable in a production deployment.

use std::future::Future;
use std::pin::Pin;

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::providers::types::{DebugPayload, FoundEmail, FoundPhone, TraceQuery, TraceResponse};
use crate::providers::{ProviderError, SkipTraceProvider};

pub const DEMO_PROVIDER_ID: &str = "demo";

#[derive(Default)]
pub struct DemoProvider;

impl DemoProvider {
    pub fn new() -> Self {
        Self
    }

    fn synthesize(query: &TraceQuery) -> TraceResponse {
        let mut hasher = Sha256::new();
        hasher.update(query.lead_id.as_bytes());
        hasher.update(b"|");
        hasher.update(query.street.as_bytes());
        hasher.update(query.city.as_bytes());
        hasher.update(query.state.as_bytes());
        hasher.update(query.zip.as_bytes());
        let digest = hasher.finalize();

        // 555-01xx numbers are reserved for fiction; derive the suffix and
        // area code from the digest so repeated lookups agree.
        let area = 200 + (u16::from(digest[0]) % 700);
        let suffix = u16::from_be_bytes([digest[1], digest[2]]) % 100;
        let phone = format!("{area}555{suffix:04}");

        let email_user = format!("demo-{:02x}{:02x}", digest[3], digest[4]);

        TraceResponse {
            success: true,
            phones: vec![FoundPhone {
                number: phone,
                phone_type: Some("mobile".into()),
                carrier: Some("Synthetic Wireless".into()),
                is_primary: true,
                is_do_not_call: false,
                confidence: 0.5,
                can_call: None,
                is_quiet_hours: None,
            }],
            emails: vec![FoundEmail {
                address: format!("{email_user}@example.invalid"),
                email_type: Some("synthetic".into()),
                is_primary: true,
                confidence: 0.5,
            }],
            cost_cents: 0,
            request_id: Some(format!("demo-{:02x}{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2], digest[3])),
            error: None,
            debug: DebugPayload {
                request: json!({"synthetic": true}),
                response: json!({"synthetic": true}),
            },
        }
    }
}

impl SkipTraceProvider for DemoProvider {
    fn id(&self) -> &str {
        DEMO_PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Synthetic Demo Data"
    }

    fn cost_cents(&self) -> i64 {
        0
    }

    fn skip_trace(
        &self,
        query: &TraceQuery,
    ) -> Pin<Box<dyn Future<Output = Result<TraceResponse, ProviderError>> + Send + '_>> {
        let response = Self::synthesize(query);
        Box::pin(async move { Ok(response) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(lead: &str, street: &str) -> TraceQuery {
        TraceQuery {
            lead_id: lead.into(),
            street: street.into(),
            city: "Springfield".into(),
            state: "IL".into(),
            zip: "62704".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_demo_is_deterministic() {
        let provider = DemoProvider::new();
        let a = provider.skip_trace(&query("lead-1", "123 Main St")).await.unwrap();
        let b = provider.skip_trace(&query("lead-1", "123 Main St")).await.unwrap();
        assert_eq!(a.phones[0].number, b.phones[0].number);
        assert_eq!(a.emails[0].address, b.emails[0].address);
        assert_eq!(a.request_id, b.request_id);
    }

    #[tokio::test]
    async fn test_demo_varies_by_lead() {
        let provider = DemoProvider::new();
        let a = provider.skip_trace(&query("lead-1", "123 Main St")).await.unwrap();
        let b = provider.skip_trace(&query("lead-2", "123 Main St")).await.unwrap();
        assert_ne!(a.phones[0].number, b.phones[0].number);
    }

    #[tokio::test]
    async fn test_demo_is_free_and_clearly_fake() {
        let provider = DemoProvider::new();
        let resp = provider.skip_trace(&query("lead-1", "123 Main St")).await.unwrap();
        assert_eq!(resp.cost_cents, 0);
        assert!(resp.phones[0].number.contains("555"));
        assert!(resp.emails[0].address.ends_with("@example.invalid"));
    }
}
