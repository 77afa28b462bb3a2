//! Circuit breaker for provider health.
//!
//! One process-wide breaker protects all outbound lookups. States
//! transition as follows:
//!
//!   Closed (normal) --[N failures]--> Open (reject all)
//!   Open --[cooldown expires]--> HalfOpen (allow probe)
//!   HalfOpen --[success]--> Closed
//!   HalfOpen --[any failure]--> Open
//!
//! Only real provider outcomes feed the breaker; cache hits never do.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Circuit State
// ---------------------------------------------------------------------------

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation -- requests are allowed through.
    #[default]
    Closed,
    /// Providers are failing -- all requests are rejected.
    Open,
    /// Testing recovery -- a probe request is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Process-wide circuit breaker. In-memory only; resets on restart
/// (it protects against short-term storms, not long-term spend).
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            failure_threshold,
            cooldown,
        }
    }

    // -- queries -------------------------------------------------------------

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Number of consecutive failures recorded.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Whether the breaker currently allows a request through.
    ///
    /// Side-effect: if the breaker is Open and the cooldown has elapsed it
    /// will transition to HalfOpen.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(last) = self.last_failure {
                    if last.elapsed() >= self.cooldown {
                        self.state = CircuitState::HalfOpen;
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => true,
        }
    }

    // -- recording -----------------------------------------------------------

    /// Record a successful provider call. A success while half-open closes
    /// the breaker.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    /// Record a failed provider call.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());

        match self.state {
            CircuitState::HalfOpen => {
                // Any failure in half-open trips back to open.
                self.state = CircuitState::Open;
            }
            _ => {
                if self.failure_count >= self.failure_threshold {
                    tracing::warn!(
                        failures = self.failure_count,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Circuit breaker opened"
                    );
                    self.state = CircuitState::Open;
                }
            }
        }
    }

    /// Reset to the Closed state (e.g. after operator intervention).
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
