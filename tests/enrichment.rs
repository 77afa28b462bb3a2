//! End-to-end enrichment flows against an in-memory database and a
//! scriptable stub provider: the warm-cache billing scenario, the
//! sanitized-retry ladder and a full batch run with pause/resume.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use skiphound::batch::{self, RunStatus};
use skiphound::cache::TraceCache;
use skiphound::config::Config;
use skiphound::db::Database;
use skiphound::dnc::DncClient;
use skiphound::enrich::{EnrichmentOptions, Orchestrator};
use skiphound::guardrails::GuardrailSet;
use skiphound::providers::client::HttpClient;
use skiphound::providers::types::{DebugPayload, FoundEmail, FoundPhone, TraceQuery, TraceResponse};
use skiphound::providers::{ProviderError, ProviderRegistry, SkipTraceProvider};
use skiphound::signature;
use skiphound::store::audit::AuditEntry;

// ---------------------------------------------------------------------------
// Stub provider
// ---------------------------------------------------------------------------

struct ScriptedProvider {
    id: &'static str,
    script: Mutex<VecDeque<Result<TraceResponse, String>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(id: &'static str, script: Vec<Result<TraceResponse, String>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
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
        _query: &TraceQuery,
    ) -> Pin<Box<dyn Future<Output = Result<TraceResponse, ProviderError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            match step {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(ProviderError::Other(message)),
                None => Ok(found_contacts()),
            }
        })
    }
}

fn found_contacts() -> TraceResponse {
    TraceResponse {
        success: true,
        phones: vec![FoundPhone {
            number: "2175550123".into(),
            phone_type: Some("mobile".into()),
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
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Env {
    db: Database,
    orchestrator: Arc<Orchestrator>,
    cache: Arc<TraceCache>,
    _audit_rx: mpsc::UnboundedReceiver<AuditEntry>,
    batch_config: skiphound::config::BatchConfig,
}

fn build_env(providers: Vec<Arc<dyn SkipTraceProvider>>, tune: impl FnOnce(&mut Config)) -> Env {
    let db = Database::open_in_memory().unwrap();

    let mut config = Config::default();
    config.enrichment.retry_delay_ms = 1;
    config.guardrails.daily_budget_cents = 0;
    config.guardrails.daily_quota = 0;
    config.guardrails.rate_per_sec = 10_000.0;
    config.guardrails.breaker_failure_threshold = 100;
    config.batch.pause_poll_ms = 10;
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

    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        Arc::clone(&cache),
        guardrails,
        Arc::new(registry),
        DncClient::new(None, HttpClient::new()),
        &config,
        tx,
    ));

    Env {
        db,
        orchestrator,
        cache,
        _audit_rx: rx,
        batch_config: config.batch.clone(),
    }
}

fn seed_lead(db: &Database, id: &str, address: &str, owner: &str) {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO leads (id, address, owner_name) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, address, owner],
        )?;
        Ok(())
    })
    .unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: warm cache billing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn warm_cache_scenario_bills_exactly_once() {
    let provider = ScriptedProvider::new(
        "batchdata",
        vec![Ok(found_contacts()), Ok(found_contacts())],
    );
    let env = build_env(vec![Arc::clone(&provider) as Arc<dyn SkipTraceProvider>], |_| {});
    seed_lead(
        &env.db,
        "lead-1",
        "123 Main St Apt 4B, Springfield, IL 62704",
        "John A. Smith",
    );

    // First call: no cache, hits the provider, cost > 0, cache written
    // under the primary signature.
    let first = env
        .orchestrator
        .enrich("lead-1", &EnrichmentOptions::default())
        .await
        .unwrap();
    assert!(first.success && !first.cached);
    assert_eq!(first.cost_cents, 25);
    assert_eq!(first.phones.len(), 1);
    assert_eq!(first.emails.len(), 1);

    let sig = signature::signature("123 Main St Apt 4B, Springfield, IL 62704", "John A. Smith");
    assert!(env.cache.get("batchdata", &sig.primary).unwrap().is_some());

    // Second call within the TTL: identical contacts, cost 0, cached.
    let second = env
        .orchestrator
        .enrich("lead-1", &EnrichmentOptions::default())
        .await
        .unwrap();
    assert!(second.success && second.cached);
    assert_eq!(second.cost_cents, 0);
    assert_eq!(second.phones[0].number, first.phones[0].number);
    assert_eq!(provider.calls(), 1);

    // Third call with forceRefresh re-invokes the provider even though
    // the cache is warm.
    let third = env
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
    assert!(third.success && !third.cached);
    assert_eq!(provider.calls(), 2);

    // Billing ledger: one row per physical call.
    let ledger_rows: i64 = env
        .db
        .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM provider_calls", [], |r| r.get(0)))
        .unwrap();
    assert_eq!(ledger_rows, 2);
}

// ---------------------------------------------------------------------------
// Scenario: retries exhausted, sanitized retry succeeds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sanitized_retry_lands_in_secondary_bucket() {
    let provider = ScriptedProvider::new(
        "batchdata",
        vec![
            Err("connection timed out".into()),
            Err("connection timed out".into()),
            Err("connection timed out".into()),
            Ok(found_contacts()),
        ],
    );
    let env = build_env(vec![Arc::clone(&provider) as Arc<dyn SkipTraceProvider>], |c| {
        c.enrichment.max_retries = 2;
    });
    seed_lead(
        &env.db,
        "lead-1",
        "123 Main St Apt 4B, Springfield, IL 62704",
        "John A. Smith",
    );

    let outcome = env
        .orchestrator
        .enrich("lead-1", &EnrichmentOptions::default())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.attempt_reason, "address_sanitized");
    // 1 initial + 2 retries + 1 sanitized.
    assert_eq!(provider.calls(), 4);

    let sig = signature::signature("123 Main St Apt 4B, Springfield, IL 62704", "John A. Smith");
    assert!(env.cache.get("batchdata", &sig.secondary).unwrap().is_some());
    assert!(env.cache.get("batchdata", &sig.primary).unwrap().is_none());

    // A later identical request still attempts the unsanitized query
    // first (primary bucket is unset), so the provider is consulted
    // again.
    let again = env
        .orchestrator
        .enrich("lead-1", &EnrichmentOptions::default())
        .await
        .unwrap();
    assert!(again.success);
    assert_eq!(provider.calls(), 5);
}

// ---------------------------------------------------------------------------
// Scenario: full batch run with pause/resume
// ---------------------------------------------------------------------------

async fn wait_for_status(db: &Database, run_id: &str, status: RunStatus) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let run = batch::get_run(db, run_id).unwrap().unwrap();
            if run.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run did not reach expected status in time");
}

#[tokio::test]
async fn batch_run_pause_resume_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new("batchdata", Vec::new());
    let artifact_dir = dir.path().to_path_buf();
    let env = build_env(vec![Arc::clone(&provider) as Arc<dyn SkipTraceProvider>], |c| {
        c.batch.artifact_dir = artifact_dir;
    });

    let mut lead_ids = Vec::new();
    for i in 0..4 {
        let id = format!("lead-{i}");
        seed_lead(&env.db, &id, &format!("{i} Elm Rd, Dover, DE 19901"), "Jane Doe");
        lead_ids.push(id);
    }

    let run = batch::create_run(&env.db, "nightly", &lead_ids, 0).unwrap();

    // Pause before starting, then start the driver: it must idle.
    batch::set_pause_requested(&env.db, &run.id, true).unwrap();
    batch::driver::spawn_run(
        env.db.clone(),
        Arc::clone(&env.orchestrator),
        env.batch_config.clone(),
        run.id.clone(),
    );
    wait_for_status(&env.db, &run.id, RunStatus::Paused).await;
    assert_eq!(provider.calls(), 0);

    // Resume and drain.
    batch::set_pause_requested(&env.db, &run.id, false).unwrap();
    wait_for_status(&env.db, &run.id, RunStatus::Completed).await;

    let counts = batch::item_counts(&env.db, &run.id).unwrap();
    assert_eq!(counts.done, 4);
    assert_eq!(counts.queued + counts.in_flight + counts.failed, 0);
    // Each item processed exactly once.
    assert_eq!(provider.calls(), 4);

    let finished = batch::get_run(&env.db, &run.id).unwrap().unwrap();
    let report: serde_json::Value =
        serde_json::from_str(finished.report_json.as_deref().unwrap()).unwrap();
    assert_eq!(report["done"], 4);
    assert_eq!(report["failed"], 0);

    let artifact = std::fs::read_to_string(finished.artifact_path.unwrap()).unwrap();
    assert_eq!(artifact.lines().count(), 5);
}
