//! Skip-Trace Provider Module
//!
//! Defines the core SkipTraceProvider trait and error types, plus the
//! startup registry and concrete vendor adapters (BatchData, DirectSkip)
//! and the gated synthetic demo adapter.

pub mod batchdata;
pub mod client;
pub mod demo;
pub mod directskip;
pub mod types;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::Config;
use crate::providers::client::HttpClient;
use crate::providers::types::{TraceQuery, TraceResponse};

pub use self::batchdata::BatchDataProvider;
pub use self::demo::DemoProvider;
pub use self::directskip::DirectSkipProvider;

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Errors that can occur during provider operations.
///
/// Vendor HTTP error *responses* are not errors here — adapters fold those
/// into `TraceResponse { success: false, .. }`. This enum covers transport
/// failures and misconfiguration only.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Unknown provider: {0}")]
    Unknown(String),

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// SkipTraceProvider trait
// ---------------------------------------------------------------------------

/// Trait implemented by every identity-resolution vendor.
///
/// Async methods return boxed futures so the trait is dyn-compatible (can
/// be used as `Arc<dyn SkipTraceProvider>`). No `async_trait` macro is
/// needed.
pub trait SkipTraceProvider: Send + Sync {
    /// Unique identifier for this provider (e.g. "batchdata", "directskip").
    fn id(&self) -> &str;

    /// Human-readable display name.
    fn name(&self) -> &str;

    /// List price per successful lookup, in cents. Used to pre-check the
    /// budget cap before any network call.
    fn cost_cents(&self) -> i64;

    /// Look up current contact information for a property owner.
    fn skip_trace(
        &self,
        query: &TraceQuery,
    ) -> Pin<Box<dyn Future<Output = Result<TraceResponse, ProviderError>> + Send + '_>>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Provider lookup map built once at startup. String-keyed dispatch
/// happens only here; call sites hold `Arc<dyn SkipTraceProvider>`.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SkipTraceProvider>>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration.
    ///
    /// When demo mode is active (both flags set, non-production), only the
    /// synthetic adapter is registered, so real vendors are unreachable.
    pub fn from_config(config: &Config, http: &HttpClient) -> Result<Self, ProviderError> {
        let mut registry = Self::new();

        if config.demo_active() {
            tracing::warn!("Demo mode active: all lookups return synthetic contacts");
            registry.register(Arc::new(DemoProvider::new()));
            return Ok(registry);
        }

        if let Some(ref cfg) = config.providers.batchdata {
            registry.register(Arc::new(BatchDataProvider::new(cfg.clone(), http.clone())?));
        }
        if let Some(ref cfg) = config.providers.directskip {
            registry.register(Arc::new(DirectSkipProvider::new(cfg.clone(), http.clone())?));
        }

        if registry.is_empty() {
            return Err(ProviderError::NotConfigured(
                "no skip-trace providers configured".into(),
            ));
        }

        Ok(registry)
    }

    /// Register a provider. Replaces any existing entry with the same id.
    pub fn register(&mut self, provider: Arc<dyn SkipTraceProvider>) {
        let id = provider.id().to_string();
        if self.providers.contains_key(&id) {
            tracing::warn!(provider = %id, "Provider already registered, replacing");
            self.order.retain(|o| o != &id);
        }
        self.order.push(id.clone());
        self.providers.insert(id, provider);
    }

    /// Resolve a provider by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn SkipTraceProvider>, ProviderError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::Unknown(id.to_string()))
    }

    /// Registered provider IDs in registration order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// In demo mode every lookup resolves to the synthetic adapter
    /// regardless of the configured provider name.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn SkipTraceProvider>, ProviderError> {
        if let Some(demo) = self.providers.get(demo::DEMO_PROVIDER_ID) {
            return Ok(Arc::clone(demo));
        }
        self.get(id)
    }
}
