//! Token bucket bounding outbound calls per second.
//!
//! Acquiring a token suspends the caller until one is available rather
//! than failing; the wait is bounded by the refill rate.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Refillable token bucket. Capacity equals the per-second rate, so a
/// quiet period never banks more than one second of burst.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64) -> Self {
        let rate = rate_per_sec.max(0.01);
        Self {
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
            capacity: rate,
            refill_per_sec: rate,
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }

                // Time until the next whole token accrues.
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limiting: waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (for the health snapshot).
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = Instant::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
