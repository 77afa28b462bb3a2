//! Daily spend cap.
//!
//! The accumulator is in-memory but bootstrapped from the provider-call
//! ledger at startup (and again on day rollover), so restarts cannot
//! forget money already spent today.

use chrono::{NaiveDate, Utc};
use std::sync::Mutex;

use crate::db::Database;

/// Point-in-time budget view for health/analytics endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BudgetSnapshot {
    pub spent_cents: i64,
    pub cap_cents: i64,
    pub paused: bool,
}

struct BudgetState {
    day: NaiveDate,
    spent_cents: i64,
}

/// Running cents total for the current UTC day, checked against a hard cap.
/// A cap of 0 disables the check.
pub struct DailyBudget {
    db: Database,
    cap_cents: i64,
    state: Mutex<BudgetState>,
}

impl DailyBudget {
    /// Build the budget guard, seeding today's spend from the ledger.
    pub fn bootstrap(db: Database, cap_cents: i64) -> Result<Self, rusqlite::Error> {
        let today = Utc::now().date_naive();
        let spent = ledger_spend(&db, today)?;

        tracing::info!(
            spent_cents = spent,
            cap_cents,
            "Daily budget bootstrapped from provider-call ledger"
        );

        Ok(Self {
            db,
            cap_cents,
            state: Mutex::new(BudgetState {
                day: today,
                spent_cents: spent,
            }),
        })
    }

    /// Whether the day's spend is at or over the cap.
    pub fn is_paused(&self) -> bool {
        if self.cap_cents <= 0 {
            return false;
        }
        let mut state = self.state.lock().expect("budget mutex poisoned");
        self.roll_day(&mut state);
        state.spent_cents >= self.cap_cents
    }

    /// Add a successful billable call to the day's total.
    pub fn record(&self, cost_cents: i64) {
        if cost_cents <= 0 {
            return;
        }
        let mut state = self.state.lock().expect("budget mutex poisoned");
        self.roll_day(&mut state);
        state.spent_cents += cost_cents;
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let mut state = self.state.lock().expect("budget mutex poisoned");
        self.roll_day(&mut state);
        BudgetSnapshot {
            spent_cents: state.spent_cents,
            cap_cents: self.cap_cents,
            paused: self.cap_cents > 0 && state.spent_cents >= self.cap_cents,
        }
    }

    /// Re-seed from the ledger when the UTC date changes.
    fn roll_day(&self, state: &mut BudgetState) {
        let today = Utc::now().date_naive();
        if state.day != today {
            state.day = today;
            state.spent_cents = ledger_spend(&self.db, today).unwrap_or(0);
            tracing::info!(spent_cents = state.spent_cents, "Budget day rolled over");
        }
    }
}

/// Sum of successful call costs for the given day, from the ledger.
fn ledger_spend(db: &Database, day: NaiveDate) -> Result<i64, rusqlite::Error> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT COALESCE(SUM(cost_cents), 0) FROM provider_calls \
             WHERE status = 'success' AND date(created_at) = ?1",
            [day.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
