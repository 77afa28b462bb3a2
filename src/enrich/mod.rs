//! Enrichment orchestrator.
//!
//! Drives one lead through cache lookup, guardrail checks, the primary
//! provider, the retry/variant/fallback ladder and persistence. Attempts
//! within one lead are strictly sequential; the hosting process may run
//! many orchestrations concurrently for different leads against the
//! shared process-wide guardrail set.

pub mod ladder;
pub mod zip_hints;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{CachedContacts, TraceCache};
use crate::config::{Config, EnrichmentConfig};
use crate::db::Database;
use crate::dnc::DncClient;
use crate::guardrails::{GuardrailError, GuardrailSet};
use crate::providers::types::{FoundEmail, FoundPhone, TraceQuery, TraceResponse};
use crate::providers::{ProviderError, ProviderRegistry, SkipTraceProvider};
use crate::signature::{self, CanonicalSignature};
use crate::store::audit::{self, AuditEntry, ProviderCallRecord};
use crate::store::{contacts, leads};

pub use self::ladder::{AttemptReason, LadderContext, LadderState, OutcomeKind};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Per-call options; every field has a config-level default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnrichmentOptions {
    /// Skip the cache read (cache rows are overwritten, never deleted).
    pub force_refresh: bool,
    /// Override the configured primary provider.
    pub provider: Option<String>,
    /// Override the fallback enable flag.
    pub use_fallback: Option<bool>,
    /// Override the retry count.
    pub max_retries: Option<u32>,
    pub zip_override: Option<String>,
    pub street_override: Option<String>,
    /// Batch run this call belongs to, for the audit trail.
    pub run_id: Option<String>,
}

/// Structured result returned to callers. Provider unavailability is a
/// `success: false` outcome, never a transport error.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentOutcome {
    pub lead_id: String,
    pub success: bool,
    pub cached: bool,
    pub provider: String,
    pub phones: Vec<FoundPhone>,
    pub emails: Vec<FoundEmail>,
    pub cost_cents: i64,
    pub attempt_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures that abort the ladder immediately and propagate to the
/// caller. Ordinary provider failures are not here: they surface as
/// `EnrichmentOutcome { success: false, .. }`.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("lead not found: {0}")]
    LeadNotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// Internal attempt result
// ---------------------------------------------------------------------------

enum AttemptResult {
    Success(TraceResponse),
    NoContacts(TraceResponse),
    Failure(String),
}

impl AttemptResult {
    fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::NoContacts(_) => OutcomeKind::NoContacts,
            Self::Failure(_) => OutcomeKind::Failure,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    db: Database,
    cache: Arc<TraceCache>,
    guardrails: Arc<GuardrailSet>,
    registry: Arc<ProviderRegistry>,
    dnc: DncClient,
    defaults: EnrichmentConfig,
    cache_ttl_days: u32,
    audit_tx: mpsc::UnboundedSender<AuditEntry>,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        cache: Arc<TraceCache>,
        guardrails: Arc<GuardrailSet>,
        registry: Arc<ProviderRegistry>,
        dnc: DncClient,
        config: &Config,
        audit_tx: mpsc::UnboundedSender<AuditEntry>,
    ) -> Self {
        Self {
            db,
            cache,
            guardrails,
            registry,
            dnc,
            defaults: config.enrichment.clone(),
            cache_ttl_days: config.cache.ttl_days,
            audit_tx,
        }
    }

    /// Run one lead through the full ladder.
    pub async fn enrich(
        &self,
        lead_id: &str,
        options: &EnrichmentOptions,
    ) -> Result<EnrichmentOutcome, EnrichError> {
        let lead = leads::get_lead(&self.db, lead_id)?
            .ok_or_else(|| EnrichError::LeadNotFound(lead_id.to_string()))?;

        // Parse address/owner and apply per-call overrides before the
        // signature is computed, so overrides get their own cache bucket.
        let mut addr = signature::parse_address(&lead.address);
        if let Some(ref street) = options.street_override {
            addr.street = street.clone();
        }
        if let Some(ref zip) = options.zip_override {
            addr.zip = zip.clone();
        }
        let owner = signature::parse_owner(&lead.owner_name);
        let sig = CanonicalSignature::compute(&addr, &owner);

        let provider_id = options
            .provider
            .clone()
            .unwrap_or_else(|| self.defaults.primary_provider.clone());
        let provider = self
            .registry
            .resolve(&provider_id)
            .map_err(|e| EnrichError::Configuration(e.to_string()))?;

        // Cache check short-circuits everything: no guardrails, no call,
        // cost 0.
        if options.force_refresh {
            leads::clear_needs_refresh(&self.db, lead_id)?;
        } else if let Some(hit) = self.cache.get(provider.id(), &sig.primary)? {
            debug!(lead_id, provider = provider.id(), "Cache hit");
            self.send_audit(AuditEntry {
                lead_id: lead_id.to_string(),
                provider: provider.id().to_string(),
                success: true,
                cost_cents: 0,
                phones_found: hit.phones.len() as i64,
                emails_found: hit.emails.len() as i64,
                cached: true,
                error: None,
                request_snapshot: None,
                response_snapshot: None,
                zip_hint_used: None,
                attempt_reason: AttemptReason::Cached.as_str().into(),
                run_id: options.run_id.clone(),
            });
            return Ok(EnrichmentOutcome {
                lead_id: lead_id.to_string(),
                success: true,
                cached: true,
                provider: provider.id().to_string(),
                phones: hit.phones,
                emails: hit.emails,
                cost_cents: 0,
                attempt_reason: AttemptReason::Cached.as_str().into(),
                error: None,
            });
        }

        // ZIP hint #1 is substituted into the query (not the signature)
        // when the parsed ZIP is empty and the municipality is known
        // ambiguous.
        let hints = zip_hints::hints_for(&addr.city, &addr.state);
        let zip_was_empty = addr.zip.is_empty();
        let mut base_query = TraceQuery {
            lead_id: lead_id.to_string(),
            first_name: owner.first.clone(),
            last_name: owner.last.clone(),
            street: addr.street.clone(),
            city: addr.city.clone(),
            state: addr.state.clone(),
            zip: addr.zip.clone(),
        };
        let mut zip_hint_used: Option<String> = None;
        if zip_was_empty {
            if let Some([first, _]) = hints {
                base_query.zip = first.to_string();
                zip_hint_used = Some(first.to_string());
            }
        }

        let fallback_requested = options.use_fallback.unwrap_or(self.defaults.fallback_enabled);
        let fallback_provider = if fallback_requested {
            self.registry.resolve(&self.defaults.fallback_provider).ok()
        } else {
            None
        };

        let ctx = LadderContext {
            max_retries: options.max_retries.unwrap_or(self.defaults.max_retries),
            has_second_zip_hint: zip_was_empty && hints.is_some(),
            has_unit: sig.has_unit,
            fallback_enabled: fallback_provider.is_some(),
        };
        let retry_delay = Duration::from_millis(self.defaults.retry_delay_ms);

        let mut state = LadderState::Primary;
        let mut last_error: Option<String> = None;

        loop {
            let (attempt_provider, query, hint) = self.plan_attempt(
                state,
                &provider,
                fallback_provider.as_ref(),
                &base_query,
                hints,
                &zip_hint_used,
            );
            let reason = state.reason();

            let result = self
                .attempt(
                    &*attempt_provider,
                    &query,
                    reason,
                    &sig,
                    hint.clone(),
                    options.run_id.as_deref(),
                )
                .await?;

            let kind = result.kind();
            match result {
                AttemptResult::Success(response) => {
                    let outcome = self
                        .persist_success(lead_id, attempt_provider.id(), &sig, reason, response, options)
                        .await?;
                    return Ok(outcome);
                }
                AttemptResult::NoContacts(_) => {
                    last_error = Some("no contacts found".to_string());
                }
                AttemptResult::Failure(error) => {
                    last_error = Some(error);
                }
            }

            state = ladder::next_state(state, kind, &ctx);
            match state {
                LadderState::Exhausted => break,
                LadderState::Retry(n) => {
                    debug!(lead_id, retry = n, "Retrying after fixed delay");
                    tokio::time::sleep(retry_delay).await;
                }
                _ => {}
            }
        }

        let error = last_error.unwrap_or_else(|| "enrichment failed".to_string());
        warn!(lead_id, error = %error, "Enrichment exhausted the attempt ladder");
        self.send_audit(AuditEntry {
            lead_id: lead_id.to_string(),
            provider: provider.id().to_string(),
            success: false,
            cost_cents: 0,
            phones_found: 0,
            emails_found: 0,
            cached: false,
            error: Some(error.clone()),
            request_snapshot: None,
            response_snapshot: None,
            zip_hint_used,
            attempt_reason: "summary".into(),
            run_id: options.run_id.clone(),
        });

        Ok(EnrichmentOutcome {
            lead_id: lead_id.to_string(),
            success: false,
            cached: false,
            provider: provider.id().to_string(),
            phones: Vec::new(),
            emails: Vec::new(),
            cost_cents: 0,
            attempt_reason: "summary".into(),
            error: Some(error),
        })
    }

    /// Resolve which provider and query shape a ladder rung uses.
    fn plan_attempt(
        &self,
        state: LadderState,
        primary: &Arc<dyn SkipTraceProvider>,
        fallback: Option<&Arc<dyn SkipTraceProvider>>,
        base_query: &TraceQuery,
        hints: Option<[&'static str; 2]>,
        zip_hint_used: &Option<String>,
    ) -> (Arc<dyn SkipTraceProvider>, TraceQuery, Option<String>) {
        match state {
            LadderState::ZipHintAlternate => {
                let mut query = base_query.clone();
                if let Some([_, second]) = hints {
                    query.zip = second.to_string();
                }
                let hint = Some(query.zip.clone());
                (Arc::clone(primary), query, hint)
            }
            LadderState::AddressSanitized => {
                let mut query = base_query.clone();
                let (bare, _) = signature::strip_unit_tokens(&query.street);
                query.street = bare;
                (Arc::clone(primary), query, zip_hint_used.clone())
            }
            LadderState::Fallback => {
                let provider = fallback.cloned().unwrap_or_else(|| Arc::clone(primary));
                (provider, base_query.clone(), zip_hint_used.clone())
            }
            _ => (Arc::clone(primary), base_query.clone(), zip_hint_used.clone()),
        }
    }

    /// One guarded physical call: guardrail admission, the vendor call,
    /// outcome recording into the breaker/budget/quota, the ledger row and
    /// the per-attempt audit entry.
    async fn attempt(
        &self,
        provider: &dyn SkipTraceProvider,
        query: &TraceQuery,
        reason: AttemptReason,
        sig: &CanonicalSignature,
        zip_hint: Option<String>,
        run_id: Option<&str>,
    ) -> Result<AttemptResult, EnrichError> {
        self.guardrails.admit(provider.id()).await?;

        let start = Instant::now();
        let call_result = provider.skip_trace(query).await;
        let duration_ms = start.elapsed().as_millis() as i64;

        // The sanitized attempt's ledger row gets its key back-filled
        // after the outcome is known; every other rung bills against the
        // primary signature.
        let ledger_key = match reason {
            AttemptReason::AddressSanitized => None,
            _ => Some(sig.primary.clone()),
        };

        let (result, response) = match call_result {
            Ok(response) if response.success && response.has_contacts() => {
                self.guardrails
                    .record_success(provider.id(), response.cost_cents);
                (AttemptResult::Success(response.clone()), Some(response))
            }
            Ok(response) if response.success => {
                // A success carrying zero contacts is not billable value;
                // reclassify as failure. The vendor still answered, so the
                // breaker sees a success and the call still counts against
                // budget and quota.
                self.guardrails
                    .record_success(provider.id(), response.cost_cents);
                (AttemptResult::NoContacts(response.clone()), Some(response))
            }
            Ok(response) => {
                self.guardrails.record_failure();
                let error = response
                    .error
                    .clone()
                    .unwrap_or_else(|| "provider error".to_string());
                (AttemptResult::Failure(error), Some(response))
            }
            Err(ProviderError::NotConfigured(what)) => {
                return Err(EnrichError::Configuration(what));
            }
            Err(e) => {
                // Timeouts and connection failures are treated identically
                // to structured provider failures.
                self.guardrails.record_failure();
                (AttemptResult::Failure(e.to_string()), None)
            }
        };

        let (success, cost_cents, request_id, error_message, mut request_snapshot, mut response_snapshot) =
            match (&result, &response) {
                (AttemptResult::Failure(error), Some(r)) => (
                    false,
                    0,
                    r.request_id.clone(),
                    Some(error.clone()),
                    Some(r.debug.request.clone()),
                    Some(r.debug.response.clone()),
                ),
                (AttemptResult::Failure(error), None) => {
                    (false, 0, None, Some(error.clone()), None, None)
                }
                (AttemptResult::NoContacts(_), Some(r)) => (
                    true,
                    r.cost_cents,
                    r.request_id.clone(),
                    Some("no contacts found".to_string()),
                    Some(r.debug.request.clone()),
                    Some(r.debug.response.clone()),
                ),
                (_, Some(r)) => (
                    true,
                    r.cost_cents,
                    r.request_id.clone(),
                    None,
                    Some(r.debug.request.clone()),
                    Some(r.debug.response.clone()),
                ),
                _ => (true, 0, None, None, None, None),
            };

        if let Some(ref mut snapshot) = request_snapshot {
            audit::mask_secrets(snapshot);
        }
        if let Some(ref mut snapshot) = response_snapshot {
            audit::mask_secrets(snapshot);
        }

        let payload_hash = response
            .as_ref()
            .map(|r| crate::cache::store::hash_payload(&r.debug.response.to_string()));

        audit::record_call(
            &self.db,
            &ProviderCallRecord {
                lead_id: query.lead_id.clone(),
                provider: provider.id().to_string(),
                request_id,
                cost_cents,
                duration_ms,
                success,
                error_message: error_message.clone(),
                idempotency_key: ledger_key,
                payload_hash,
                run_id: run_id.map(String::from),
            },
        )?;

        self.send_audit(AuditEntry {
            lead_id: query.lead_id.clone(),
            provider: provider.id().to_string(),
            success: matches!(result, AttemptResult::Success(_)),
            cost_cents,
            phones_found: response.as_ref().map_or(0, |r| r.phones.len() as i64),
            emails_found: response.as_ref().map_or(0, |r| r.emails.len() as i64),
            cached: false,
            error: error_message,
            request_snapshot,
            response_snapshot,
            zip_hint_used: zip_hint,
            attempt_reason: reason.as_str().into(),
            run_id: run_id.map(String::from),
        });

        Ok(result)
    }

    /// Persist a contacts-bearing success: normalized tables, rollups,
    /// cache write-through and the summary audit entry.
    async fn persist_success(
        &self,
        lead_id: &str,
        provider_id: &str,
        sig: &CanonicalSignature,
        reason: AttemptReason,
        mut response: TraceResponse,
        options: &EnrichmentOptions,
    ) -> Result<EnrichmentOutcome, EnrichError> {
        self.dnc.annotate(&mut response.phones).await;

        let summary = contacts::persist_contacts(
            &self.db,
            lead_id,
            provider_id,
            &response.phones,
            &response.emails,
        )?;

        let cache_until = Utc::now() + chrono::Duration::days(i64::from(self.cache_ttl_days));
        leads::update_rollups(
            &self.db,
            lead_id,
            summary.phone_count,
            summary.email_count,
            summary.has_dnc,
            summary.primary_phone.as_deref(),
            summary.primary_email.as_deref(),
            cache_until,
        )?;

        // A sanitized-address success is cached under the secondary
        // signature: a later lookup for the unmodified address must still
        // attempt the unsanitized query first.
        let cache_key = match reason {
            AttemptReason::AddressSanitized => &sig.secondary,
            _ => &sig.primary,
        };
        self.cache.put(
            provider_id,
            cache_key,
            &response.debug.response.to_string(),
            &CachedContacts {
                phones: response.phones.clone(),
                emails: response.emails.clone(),
            },
        )?;

        if reason == AttemptReason::AddressSanitized {
            audit::backfill_idempotency(&self.db, lead_id, provider_id, &sig.secondary)?;
        }

        info!(
            lead_id,
            provider = provider_id,
            phones = response.phones.len(),
            emails = response.emails.len(),
            cost_cents = response.cost_cents,
            reason = reason.as_str(),
            "Enrichment succeeded"
        );

        self.send_audit(AuditEntry {
            lead_id: lead_id.to_string(),
            provider: provider_id.to_string(),
            success: true,
            cost_cents: response.cost_cents,
            phones_found: response.phones.len() as i64,
            emails_found: response.emails.len() as i64,
            cached: false,
            error: None,
            request_snapshot: None,
            response_snapshot: None,
            zip_hint_used: None,
            attempt_reason: "summary".into(),
            run_id: options.run_id.clone(),
        });

        Ok(EnrichmentOutcome {
            lead_id: lead_id.to_string(),
            success: true,
            cached: false,
            provider: provider_id.to_string(),
            phones: response.phones,
            emails: response.emails,
            cost_cents: response.cost_cents,
            attempt_reason: reason.as_str().into(),
            error: None,
        })
    }

    fn send_audit(&self, entry: AuditEntry) {
        if self.audit_tx.send(entry).is_err() {
            tracing::error!("Audit channel closed; dropping audit entry");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardrailConfig;
    use crate::providers::client::HttpClient;
    use crate::providers::types::DebugPayload;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scriptable provider: pops one canned step per call and records the
    /// queries it saw.
    struct ScriptedProvider {
        id: &'static str,
        script: Mutex<VecDeque<Result<TraceResponse, String>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<TraceQuery>>,
    }

    impl ScriptedProvider {
        fn new(id: &'static str, script: Vec<Result<TraceResponse, String>>) -> Arc<Self> {
            Arc::new(Self {
                id,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<TraceQuery> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl SkipTraceProvider for ScriptedProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn name(&self) -> &str {
            self.id
        }

        fn cost_cents(&self) -> i64 {
            25
        }

        fn skip_trace(
            &self,
            query: &TraceQuery,
        ) -> Pin<Box<dyn Future<Output = Result<TraceResponse, ProviderError>> + Send + '_>>
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(query.clone());
            let step = self.script.lock().unwrap().pop_front();
            Box::pin(async move {
                match step {
                    Some(Ok(response)) => Ok(response),
                    Some(Err(message)) => Err(ProviderError::Other(message)),
                    None => Ok(vendor_error()),
                }
            })
        }
    }

    fn contacts_response(number: &str) -> Result<TraceResponse, String> {
        Ok(TraceResponse {
            success: true,
            phones: vec![FoundPhone {
                number: number.into(),
                is_primary: true,
                confidence: 0.9,
                ..Default::default()
            }],
            emails: vec![FoundEmail {
                address: "owner@example.com".into(),
                is_primary: true,
                confidence: 0.9,
                ..Default::default()
            }],
            cost_cents: 25,
            request_id: Some("req-1".into()),
            error: None,
            debug: DebugPayload::default(),
        })
    }

    fn empty_success() -> Result<TraceResponse, String> {
        Ok(TraceResponse {
            success: true,
            cost_cents: 25,
            ..Default::default()
        })
    }

    fn vendor_error() -> TraceResponse {
        TraceResponse::failure("HTTP 500 unknown: boom", DebugPayload::default())
    }

    struct Harness {
        db: Database,
        orchestrator: Orchestrator,
        cache: Arc<TraceCache>,
        _rx: mpsc::UnboundedReceiver<AuditEntry>,
    }

    fn harness(providers: Vec<Arc<ScriptedProvider>>, tune: impl FnOnce(&mut Config)) -> Harness {
        let db = Database::open_in_memory().unwrap();

        let mut config = Config::default();
        config.enrichment.retry_delay_ms = 1;
        config.guardrails = GuardrailConfig {
            daily_budget_cents: 0,
            breaker_failure_threshold: 100,
            breaker_cooldown_secs: 60,
            rate_per_sec: 10_000.0,
            daily_quota: 0,
        };
        tune(&mut config);

        let cache = Arc::new(TraceCache::new(
            db.clone(),
            config.cache.ttl_days,
            config.cache.l1_enabled,
        ));
        let guardrails = Arc::new(GuardrailSet::bootstrap(db.clone(), &config.guardrails).unwrap());
        let mut registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(provider);
        }
        let (tx, rx) = mpsc::unbounded_channel();

        let orchestrator = Orchestrator::new(
            db.clone(),
            Arc::clone(&cache),
            guardrails,
            Arc::new(registry),
            DncClient::new(None, HttpClient::new()),
            &config,
            tx,
        );

        Harness {
            db,
            orchestrator,
            cache,
            _rx: rx,
        }
    }

    fn seed_lead(db: &Database, id: &str, address: &str, owner: &str) {
        leads::insert_test_lead(db, id, address, owner);
    }

    const ADDR: &str = "123 Main St Apt 4B, Springfield, IL 62704";
    const OWNER: &str = "John A. Smith";

    #[tokio::test]
    async fn test_first_call_bills_then_cache_hit_is_free() {
        let provider = ScriptedProvider::new(
            "batchdata",
            vec![contacts_response("2175550123"), contacts_response("9999999999")],
        );
        let h = harness(vec![Arc::clone(&provider)], |_| {});
        seed_lead(&h.db, "lead-1", ADDR, OWNER);

        let first = h
            .orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();
        assert!(first.success);
        assert!(!first.cached);
        assert_eq!(first.cost_cents, 25);
        assert_eq!(provider.calls(), 1);

        let second = h
            .orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();
        assert!(second.success);
        assert!(second.cached);
        assert_eq!(second.cost_cents, 0);
        assert_eq!(second.phones[0].number, first.phones[0].number);
        // Exactly one billable call.
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_reinvokes_provider() {
        let provider = ScriptedProvider::new(
            "batchdata",
            vec![contacts_response("2175550123"), contacts_response("2175550456")],
        );
        let h = harness(vec![Arc::clone(&provider)], |_| {});
        seed_lead(&h.db, "lead-1", ADDR, OWNER);

        h.orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();

        let refreshed = h
            .orchestrator
            .enrich(
                "lead-1",
                &EnrichmentOptions {
                    force_refresh: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(!refreshed.cached);
        assert_eq!(refreshed.phones[0].number, "2175550456");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_contacts_reclassified_as_failure() {
        let provider = ScriptedProvider::new("batchdata", vec![empty_success()]);
        let h = harness(vec![Arc::clone(&provider)], |_| {});
        seed_lead(&h.db, "lead-1", ADDR, OWNER);

        let outcome = h
            .orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.phones.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("no contacts found"));
        // Nothing cached for an empty result.
        let sig = signature::signature(ADDR, OWNER);
        assert!(h.cache.get("batchdata", &sig.primary).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retries_then_sanitized_success_cached_under_secondary() {
        // Timeout x3 (1 initial + 2 retries), then the sanitized query
        // succeeds.
        let provider = ScriptedProvider::new(
            "batchdata",
            vec![
                Err("network timeout".into()),
                Err("network timeout".into()),
                Err("network timeout".into()),
                contacts_response("2175550123"),
            ],
        );
        let h = harness(vec![Arc::clone(&provider)], |c| {
            c.enrichment.max_retries = 2;
        });
        seed_lead(&h.db, "lead-1", ADDR, OWNER);

        let outcome = h
            .orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.attempt_reason, "address_sanitized");
        assert_eq!(provider.calls(), 4);

        // The sanitized attempt queried the bare street.
        let seen = provider.seen();
        assert_eq!(seen[0].street, "123 Main St Apt 4B");
        assert_eq!(seen[3].street, "123 Main St");

        // Cached under the secondary signature; primary stays unset.
        let sig = signature::signature(ADDR, OWNER);
        assert!(h.cache.get("batchdata", &sig.secondary).unwrap().is_some());
        assert!(h.cache.get("batchdata", &sig.primary).unwrap().is_none());

        // The last ledger row for this lead+provider got the back-fill.
        let key: Option<String> = h
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT idempotency_key FROM provider_calls \
                     ORDER BY rowid DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(key.as_deref(), Some(sig.secondary.as_str()));
    }

    #[tokio::test]
    async fn test_fallback_called_exactly_once() {
        let primary = ScriptedProvider::new("batchdata", vec![Err("network timeout".into())]);
        let fallback = ScriptedProvider::new("directskip", vec![contacts_response("3125550100")]);
        let h = harness(vec![Arc::clone(&primary), Arc::clone(&fallback)], |c| {
            c.enrichment.max_retries = 0;
            c.enrichment.fallback_enabled = true;
            c.enrichment.fallback_provider = "directskip".into();
        });
        // No unit in the street, so the sanitized rung is skipped.
        seed_lead(&h.db, "lead-1", "9 Elm Rd, Dover, DE 19901", "Jane Doe");

        let outcome = h
            .orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.attempt_reason, "fallback");
        assert_eq!(outcome.provider, "directskip");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_second_zip_hint_tried_after_no_contacts() {
        let provider = ScriptedProvider::new(
            "batchdata",
            vec![empty_success(), contacts_response("8475550123")],
        );
        let h = harness(vec![Arc::clone(&provider)], |_| {});
        // Known-ambiguous municipality with no ZIP in the address.
        seed_lead(&h.db, "lead-1", "42 Oak Ave, Glenview, IL", "Mary Jones");

        let outcome = h
            .orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.attempt_reason, "zip_hint_alternate");

        let seen = provider.seen();
        assert_eq!(seen[0].zip, "60025");
        assert_eq!(seen[1].zip, "60026");
    }

    #[tokio::test]
    async fn test_breaker_trips_and_fails_fast() {
        let provider = ScriptedProvider::new(
            "batchdata",
            vec![Err("timeout".into()), Err("timeout".into())],
        );
        let h = harness(vec![Arc::clone(&provider)], |c| {
            c.enrichment.max_retries = 0;
            c.guardrails.breaker_failure_threshold = 2;
        });
        seed_lead(&h.db, "lead-1", "9 Elm Rd, Dover, DE 19901", "Jane Doe");
        seed_lead(&h.db, "lead-2", "10 Elm Rd, Dover, DE 19901", "Jane Doe");
        seed_lead(&h.db, "lead-3", "11 Elm Rd, Dover, DE 19901", "Jane Doe");

        for lead in ["lead-1", "lead-2"] {
            let outcome = h
                .orchestrator
                .enrich(lead, &EnrichmentOptions::default())
                .await
                .unwrap();
            assert!(!outcome.success);
        }

        // Third request fails fast without reaching the provider.
        let err = h
            .orchestrator
            .enrich("lead-3", &EnrichmentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnrichError::Guardrail(GuardrailError::CircuitOpen)
        ));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_rejects_without_calling() {
        let provider = ScriptedProvider::new(
            "batchdata",
            vec![contacts_response("2175550123"), contacts_response("2175550456")],
        );
        let h = harness(vec![Arc::clone(&provider)], |c| {
            c.guardrails.daily_quota = 1;
        });
        seed_lead(&h.db, "lead-1", "9 Elm Rd, Dover, DE 19901", "Jane Doe");
        seed_lead(&h.db, "lead-2", "10 Elm Rd, Dover, DE 19901", "Jane Doe");

        h.orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();

        let err = h
            .orchestrator
            .enrich("lead-2", &EnrichmentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnrichError::Guardrail(GuardrailError::QuotaExceeded { .. })
        ));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_budget_pause_fails_fast() {
        let provider = ScriptedProvider::new(
            "batchdata",
            vec![contacts_response("2175550123"), contacts_response("2175550456")],
        );
        let h = harness(vec![Arc::clone(&provider)], |c| {
            c.guardrails.daily_budget_cents = 25;
        });
        seed_lead(&h.db, "lead-1", "9 Elm Rd, Dover, DE 19901", "Jane Doe");
        seed_lead(&h.db, "lead-2", "10 Elm Rd, Dover, DE 19901", "Jane Doe");

        h.orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();

        let err = h
            .orchestrator
            .enrich("lead-2", &EnrichmentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnrichError::Guardrail(GuardrailError::BudgetPaused { .. })
        ));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_lead_not_found() {
        let provider = ScriptedProvider::new("batchdata", vec![]);
        let h = harness(vec![provider], |_| {});

        let err = h
            .orchestrator
            .enrich("ghost", &EnrichmentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::LeadNotFound(_)));
    }

    #[tokio::test]
    async fn test_rollups_written_on_success() {
        let provider = ScriptedProvider::new("batchdata", vec![contacts_response("2175550123")]);
        let h = harness(vec![provider], |_| {});
        seed_lead(&h.db, "lead-1", ADDR, OWNER);

        h.orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();

        let (phone_count, primary_phone, cache_until): (i64, Option<String>, Option<String>) = h
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT phone_count, primary_phone, cache_until FROM leads WHERE id = 'lead-1'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
            })
            .unwrap();
        assert_eq!(phone_count, 1);
        assert_eq!(primary_phone.as_deref(), Some("2175550123"));
        assert!(cache_until.is_some());
    }

    #[tokio::test]
    async fn test_vendor_error_walks_ladder_not_exception() {
        let provider = ScriptedProvider::new("batchdata", vec![Ok(vendor_error())]);
        let h = harness(vec![Arc::clone(&provider)], |c| {
            c.enrichment.max_retries = 0;
        });
        seed_lead(&h.db, "lead-1", "9 Elm Rd, Dover, DE 19901", "Jane Doe");

        let outcome = h
            .orchestrator
            .enrich("lead-1", &EnrichmentOptions::default())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("HTTP 500"));
    }
}
