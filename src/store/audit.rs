//! Billing ledger and enrichment audit log.
//!
//! `provider_calls` is written synchronously: the budget guard bootstraps
//! from it, so a row must exist before the next admission check.
//! `enrichment_audit` rows are operational debugging data and flow through
//! an unbounded channel into a background batch writer.

use std::time::Duration;

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::db::Database;

// ---------------------------------------------------------------------------
// Provider-call ledger (synchronous)
// ---------------------------------------------------------------------------

/// One physical network call. Append-only; the only permitted mutation is
/// the late idempotency back-fill below.
#[derive(Debug, Clone, Default)]
pub struct ProviderCallRecord {
    pub lead_id: String,
    pub provider: String,
    pub request_id: Option<String>,
    pub cost_cents: i64,
    pub duration_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub idempotency_key: Option<String>,
    pub payload_hash: Option<String>,
    pub run_id: Option<String>,
}

/// Insert one ledger row. Returns the row id.
pub fn record_call(db: &Database, record: &ProviderCallRecord) -> Result<String, rusqlite::Error> {
    let id = Uuid::new_v4().to_string();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO provider_calls \
               (id, lead_id, provider, request_id, cost_cents, duration_ms, status, \
                error_message, idempotency_key, payload_hash, run_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                record.lead_id,
                record.provider,
                record.request_id,
                record.cost_cents,
                record.duration_ms,
                if record.success { "success" } else { "error" },
                record.error_message,
                record.idempotency_key,
                record.payload_hash,
                record.run_id,
            ],
        )?;
        Ok(())
    })?;
    Ok(id)
}

/// Late idempotency back-fill: set the key on the most recent ledger row
/// for a lead+provider. Used when a sanitized-address retry succeeds and
/// the final key (the secondary signature) is only known after the call.
pub fn backfill_idempotency(
    db: &Database,
    lead_id: &str,
    provider: &str,
    idempotency_key: &str,
) -> Result<(), rusqlite::Error> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE provider_calls SET idempotency_key = ?3 \
             WHERE id = (SELECT id FROM provider_calls \
                         WHERE lead_id = ?1 AND provider = ?2 \
                         ORDER BY created_at DESC, rowid DESC LIMIT 1)",
            params![lead_id, provider, idempotency_key],
        )?;
        Ok(())
    })
}

/// Daily cost totals per provider (analytics surface).
#[derive(Debug, Clone, Serialize)]
pub struct DailyCost {
    pub day: String,
    pub provider: String,
    pub calls: i64,
    pub cost_cents: i64,
}

pub fn daily_costs(db: &Database) -> Result<Vec<DailyCost>, rusqlite::Error> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT date(created_at), provider, COUNT(*), COALESCE(SUM(cost_cents), 0) \
             FROM provider_calls WHERE status = 'success' \
             GROUP BY date(created_at), provider \
             ORDER BY date(created_at) DESC, provider",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DailyCost {
                day: row.get(0)?,
                provider: row.get(1)?,
                calls: row.get(2)?,
                cost_cents: row.get(3)?,
            })
        })?;
        rows.collect()
    })
}

// ---------------------------------------------------------------------------
// Enrichment audit log (async, batched)
// ---------------------------------------------------------------------------

/// One orchestration attempt (cache hits included). Snapshots are masked
/// before they reach the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub lead_id: String,
    pub provider: String,
    pub success: bool,
    pub cost_cents: i64,
    pub phones_found: i64,
    pub emails_found: i64,
    pub cached: bool,
    pub error: Option<String>,
    pub request_snapshot: Option<serde_json::Value>,
    pub response_snapshot: Option<serde_json::Value>,
    pub zip_hint_used: Option<String>,
    pub attempt_reason: String,
    pub run_id: Option<String>,
}

/// Maximum number of entries to buffer before flushing, regardless of timer.
const BATCH_SIZE: usize = 100;

/// How often to flush buffered entries even if the batch is not full.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn a background task that reads [`AuditEntry`] values from the
/// channel and batch-writes them to `enrichment_audit`. The task exits
/// when the sender half is dropped and remaining entries are flushed.
pub fn spawn_audit_logger(
    db: Database,
    mut rx: mpsc::UnboundedReceiver<AuditEntry>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer: Vec<AuditEntry> = Vec::with_capacity(BATCH_SIZE);
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        // Don't pile up ticks while we're busy flushing.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                entry = rx.recv() => {
                    match entry {
                        Some(e) => {
                            buffer.push(e);
                            if buffer.len() >= BATCH_SIZE {
                                flush_batch(&db, &mut buffer);
                            }
                        }
                        None => {
                            if !buffer.is_empty() {
                                flush_batch(&db, &mut buffer);
                            }
                            tracing::info!("Audit logger shutting down");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        flush_batch(&db, &mut buffer);
                    }
                }
            }
        }
    })
}

fn flush_batch(db: &Database, buffer: &mut Vec<AuditEntry>) {
    let entries = std::mem::take(buffer);
    let count = entries.len();

    if let Err(e) = write_entries(db, &entries) {
        tracing::error!(count, error = %e, "Failed to flush audit batch");
        // Put entries back so we can retry on the next tick.
        buffer.extend(entries);
    } else {
        tracing::debug!(count, "Flushed audit batch");
    }
}

fn write_entries(db: &Database, entries: &[AuditEntry]) -> Result<(), rusqlite::Error> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO enrichment_audit \
                   (id, lead_id, provider, success, cost_cents, phones_found, emails_found, \
                    cached, error, request_snapshot, response_snapshot, zip_hint_used, \
                    attempt_reason, run_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    entry.lead_id,
                    entry.provider,
                    entry.success as i64,
                    entry.cost_cents,
                    entry.phones_found,
                    entry.emails_found,
                    entry.cached as i64,
                    entry.error,
                    entry.request_snapshot.as_ref().map(|v| v.to_string()),
                    entry.response_snapshot.as_ref().map(|v| v.to_string()),
                    entry.zip_hint_used,
                    entry.attempt_reason,
                    entry.run_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Secret masking
// ---------------------------------------------------------------------------

const SENSITIVE_KEYS: &[&str] = &[
    "authorization",
    "api_key",
    "apikey",
    "x-api-key",
    "token",
    "secret",
    "password",
];

/// Replace the values of credential-bearing keys anywhere in a JSON tree.
pub fn mask_secrets(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let lower = key.to_lowercase();
                if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                    *val = serde_json::Value::String("***".into());
                } else {
                    mask_secrets(val);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                mask_secrets(item);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_entry(lead_id: &str) -> AuditEntry {
        AuditEntry {
            lead_id: lead_id.into(),
            provider: "batchdata".into(),
            success: true,
            cost_cents: 25,
            phones_found: 1,
            emails_found: 0,
            cached: false,
            error: None,
            request_snapshot: None,
            response_snapshot: None,
            zip_hint_used: None,
            attempt_reason: "primary".into(),
            run_id: None,
        }
    }

    #[test]
    fn test_record_call_and_backfill() {
        let db = Database::open_in_memory().unwrap();

        record_call(
            &db,
            &ProviderCallRecord {
                lead_id: "lead-1".into(),
                provider: "batchdata".into(),
                cost_cents: 25,
                success: true,
                ..Default::default()
            },
        )
        .unwrap();
        let newest = record_call(
            &db,
            &ProviderCallRecord {
                lead_id: "lead-1".into(),
                provider: "batchdata".into(),
                cost_cents: 25,
                success: true,
                ..Default::default()
            },
        )
        .unwrap();

        backfill_idempotency(&db, "lead-1", "batchdata", "sig-secondary").unwrap();

        let (id, key): (String, Option<String>) = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT id, idempotency_key FROM provider_calls \
                     WHERE idempotency_key IS NOT NULL",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
            })
            .unwrap();
        // Only the most recent row was touched.
        assert_eq!(id, newest);
        assert_eq!(key.as_deref(), Some("sig-secondary"));
    }

    #[test]
    fn test_daily_costs_only_successes() {
        let db = Database::open_in_memory().unwrap();
        record_call(
            &db,
            &ProviderCallRecord {
                lead_id: "l1".into(),
                provider: "batchdata".into(),
                cost_cents: 25,
                success: true,
                ..Default::default()
            },
        )
        .unwrap();
        record_call(
            &db,
            &ProviderCallRecord {
                lead_id: "l2".into(),
                provider: "batchdata".into(),
                cost_cents: 25,
                success: false,
                ..Default::default()
            },
        )
        .unwrap();

        let costs = daily_costs(&db).unwrap();
        assert_eq!(costs.len(), 1);
        assert_eq!(costs[0].calls, 1);
        assert_eq!(costs[0].cost_cents, 25);
    }

    #[tokio::test]
    async fn test_spawn_audit_logger_flushes_on_close() {
        let db = Database::open_in_memory().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = spawn_audit_logger(db.clone(), rx);

        tx.send(make_entry("lead-1")).unwrap();
        tx.send(make_entry("lead-2")).unwrap();
        drop(tx);

        handle.await.unwrap();

        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM enrichment_audit", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_mask_secrets_nested() {
        let mut value = json!({
            "url": "https://api.example.com",
            "authorization": "Bearer sk-live-12345",
            "body": {
                "apiKey": "sk-live-12345",
                "name": "John",
                "nested": [{"x-api-key": "abc", "street": "123 Main St"}]
            }
        });

        mask_secrets(&mut value);

        assert_eq!(value["authorization"], "***");
        assert_eq!(value["body"]["apiKey"], "***");
        assert_eq!(value["body"]["nested"][0]["x-api-key"], "***");
        // Non-sensitive values untouched.
        assert_eq!(value["body"]["name"], "John");
        assert_eq!(value["body"]["nested"][0]["street"], "123 Main St");
    }
}
