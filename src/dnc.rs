//! DNC compliance collaborator.
//!
//! The orchestrator does not implement call-time compliance logic; it
//! optionally consults an external checker per phone number and records
//! the `can_call` / `is_quiet_hours` annotations. Checker failures are
//! non-fatal and leave the annotations unset.

use serde::Deserialize;

use crate::providers::client::HttpClient;
use crate::providers::types::FoundPhone;

#[derive(Debug, Deserialize)]
struct DncVerdict {
    #[serde(rename = "canCall", default)]
    can_call: bool,
    #[serde(rename = "isQuietHours", default)]
    is_quiet_hours: bool,
}

#[derive(Clone)]
pub struct DncClient {
    endpoint: Option<String>,
    http: HttpClient,
}

impl DncClient {
    pub fn new(endpoint: Option<String>, http: HttpClient) -> Self {
        Self { endpoint, http }
    }

    /// Whether a checker endpoint is configured.
    pub fn enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Annotate each phone in place. Checks run concurrently; no-op when
    /// unconfigured.
    pub async fn annotate(&self, phones: &mut [FoundPhone]) {
        if self.endpoint.is_none() {
            return;
        }

        let verdicts =
            futures::future::join_all(phones.iter().map(|p| self.check(p.number.clone()))).await;

        for (phone, verdict) in phones.iter_mut().zip(verdicts) {
            if let Some(v) = verdict {
                phone.can_call = Some(v.can_call);
                phone.is_quiet_hours = Some(v.is_quiet_hours);
            }
        }
    }

    async fn check(&self, number: String) -> Option<DncVerdict> {
        let base = self.endpoint.as_ref()?;
        let url = format!("{}/check?phone={}", base.trim_end_matches('/'), number);

        match self.http.inner().get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<DncVerdict>().await {
                    Ok(verdict) => Some(verdict),
                    Err(e) => {
                        tracing::warn!(number = %number, error = %e, "DNC verdict parse failed");
                        None
                    }
                }
            }
            Ok(response) => {
                tracing::warn!(
                    number = %number,
                    status = response.status().as_u16(),
                    "DNC check returned an error status"
                );
                None
            }
            Err(e) => {
                tracing::warn!(number = %number, error = %e, "DNC check failed");
                None
            }
        }
    }
}
