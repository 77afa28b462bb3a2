//! Per-provider daily call quota.
//!
//! Backed by the `quota_usage` table, one row per (provider, day), so the
//! count survives restarts and resets implicitly with the date key. The
//! counter is incremented only after a successful billable call; the
//! increment re-checks the cap in its WHERE clause so concurrent writers
//! can never push `used` past `quota`.

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;

use crate::db::Database;

/// One (provider, day) usage row, surfaced by the analytics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaUsage {
    pub provider: String,
    pub day: String,
    pub used: i64,
    pub quota: i64,
}

/// Daily call-count cap per provider. A quota of 0 disables the check.
pub struct DailyQuota {
    db: Database,
    quota: i64,
}

impl DailyQuota {
    pub fn new(db: Database, quota: i64) -> Self {
        Self { db, quota }
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    /// Whether the provider has quota left today. Creates the day row on
    /// first sight.
    pub fn has_remaining(&self, provider: &str) -> Result<bool, rusqlite::Error> {
        if self.quota <= 0 {
            return Ok(true);
        }
        let usage = self.usage(provider)?;
        Ok(usage.used < usage.quota)
    }

    /// Count one successful billable call. Clamped at the cap.
    pub fn record_call(&self, provider: &str) -> Result<(), rusqlite::Error> {
        if self.quota <= 0 {
            return Ok(());
        }
        let day = Self::today();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO quota_usage (provider, day, used, quota) VALUES (?1, ?2, 0, ?3)",
                params![provider, day, self.quota],
            )?;
            conn.execute(
                "UPDATE quota_usage SET used = used + 1 \
                 WHERE provider = ?1 AND day = ?2 AND used < quota",
                params![provider, day],
            )?;
            Ok(())
        })
    }

    /// Today's usage row for one provider.
    pub fn usage(&self, provider: &str) -> Result<QuotaUsage, rusqlite::Error> {
        let day = Self::today();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO quota_usage (provider, day, used, quota) VALUES (?1, ?2, 0, ?3)",
                params![provider, day, self.quota],
            )?;
            conn.query_row(
                "SELECT provider, day, used, quota FROM quota_usage WHERE provider = ?1 AND day = ?2",
                params![provider, day],
                |row| {
                    Ok(QuotaUsage {
                        provider: row.get(0)?,
                        day: row.get(1)?,
                        used: row.get(2)?,
                        quota: row.get(3)?,
                    })
                },
            )
        })
    }

    /// All usage rows, newest day first (analytics surface).
    pub fn all_usage(&self) -> Result<Vec<QuotaUsage>, rusqlite::Error> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT provider, day, used, quota FROM quota_usage ORDER BY day DESC, provider",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(QuotaUsage {
                    provider: row.get(0)?,
                    day: row.get(1)?,
                    used: row.get(2)?,
                    quota: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
