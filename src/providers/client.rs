//! Shared outbound HTTP client.

use reqwest::Client;
use std::time::Duration;

/// Default user agent for the application.
pub const USER_AGENT: &str = "skiphound/0.1.0";

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout. Vendor lookups are synchronous single-record
/// queries; anything slower is treated as a network failure. Adapters may
/// shorten this per request via their configured `timeout_secs`.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Standard client configuration (User-Agent, timeouts) shared by all
/// vendor adapters and the DNC collaborator client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        let inner = match Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to build HTTP client: {}; using defaults", e);
                Client::default()
            }
        };
        Self { inner }
    }

    /// Get the inner reqwest client.
    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
