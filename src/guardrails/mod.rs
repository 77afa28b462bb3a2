//! Guardrail Set
//!
//! Four independent policies gate every real provider call, evaluated in
//! a fixed order: daily budget cap, circuit breaker, token bucket,
//! per-provider daily quota. The set is an explicit struct owned by the
//! orchestrator's dependency set and injected, so tests can construct
//! isolated instances.

pub mod breaker;
pub mod bucket;
pub mod budget;
pub mod quota;

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::config::GuardrailConfig;
use crate::db::Database;

pub use self::breaker::{CircuitBreaker, CircuitState};
pub use self::bucket::TokenBucket;
pub use self::budget::{BudgetSnapshot, DailyBudget};
pub use self::quota::{DailyQuota, QuotaUsage};

// ---------------------------------------------------------------------------
// GuardrailError
// ---------------------------------------------------------------------------

/// Fail-fast verdicts from the guardrail checks. None of these represent a
/// provider outcome; none may be retried within the same request.
#[derive(Debug, thiserror::Error)]
pub enum GuardrailError {
    #[error("budget paused: daily spend {spent_cents}c at or over cap {cap_cents}c")]
    BudgetPaused { spent_cents: i64, cap_cents: i64 },

    #[error("circuit open: cooling down after repeated provider failures")]
    CircuitOpen,

    #[error("quota exceeded for {provider}: {used}/{quota} calls today")]
    QuotaExceeded {
        provider: String,
        used: i64,
        quota: i64,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// GuardrailSet
// ---------------------------------------------------------------------------

/// Point-in-time guardrail view for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GuardrailSnapshot {
    pub budget: BudgetSnapshot,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
}

/// Process-wide shared guardrail state. Budget and quota are ledger-backed
/// and survive restarts; the breaker and bucket are in-memory.
pub struct GuardrailSet {
    budget: DailyBudget,
    breaker: Mutex<CircuitBreaker>,
    bucket: TokenBucket,
    quota: DailyQuota,
}

impl GuardrailSet {
    /// Build the set from configuration, seeding the budget accumulator
    /// from the provider-call ledger.
    pub fn bootstrap(db: Database, config: &GuardrailConfig) -> anyhow::Result<Self> {
        let budget = DailyBudget::bootstrap(db.clone(), config.daily_budget_cents)?;
        let breaker = CircuitBreaker::new(
            config.breaker_failure_threshold,
            Duration::from_secs(config.breaker_cooldown_secs),
        );
        let bucket = TokenBucket::new(config.rate_per_sec);
        let quota = DailyQuota::new(db, config.daily_quota);

        Ok(Self {
            budget,
            breaker: Mutex::new(breaker),
            bucket,
            quota,
        })
    }

    /// Run all four checks in order. Suspends on the token bucket; the
    /// other three fail fast with a distinguished error.
    pub async fn admit(&self, provider: &str) -> Result<(), GuardrailError> {
        // 1. Daily budget cap.
        let snapshot = self.budget.snapshot();
        if snapshot.paused {
            return Err(GuardrailError::BudgetPaused {
                spent_cents: snapshot.spent_cents,
                cap_cents: snapshot.cap_cents,
            });
        }

        // 2. Circuit breaker.
        {
            let mut breaker = self.breaker.lock().expect("breaker mutex poisoned");
            if !breaker.can_execute() {
                return Err(GuardrailError::CircuitOpen);
            }
        }

        // 3. Token bucket (may suspend briefly, never fails).
        self.bucket.acquire().await;

        // 4. Per-provider daily quota.
        if !self.quota.has_remaining(provider)? {
            let usage = self.quota.usage(provider)?;
            return Err(GuardrailError::QuotaExceeded {
                provider: provider.to_string(),
                used: usage.used,
                quota: usage.quota,
            });
        }

        Ok(())
    }

    /// Record the outcome of a real provider call. Cache hits must never
    /// reach this.
    pub fn record_success(&self, provider: &str, cost_cents: i64) {
        self.breaker
            .lock()
            .expect("breaker mutex poisoned")
            .record_success();
        self.budget.record(cost_cents);
        if let Err(e) = self.quota.record_call(provider) {
            tracing::error!(provider, error = %e, "Failed to record quota usage");
        }
    }

    pub fn record_failure(&self) {
        self.breaker
            .lock()
            .expect("breaker mutex poisoned")
            .record_failure();
    }

    pub fn snapshot(&self) -> GuardrailSnapshot {
        let breaker = self.breaker.lock().expect("breaker mutex poisoned");
        GuardrailSnapshot {
            budget: self.budget.snapshot(),
            circuit: breaker.state(),
            consecutive_failures: breaker.failure_count(),
        }
    }

    pub fn quota_usage(&self) -> Result<Vec<QuotaUsage>, rusqlite::Error> {
        self.quota.all_usage()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
