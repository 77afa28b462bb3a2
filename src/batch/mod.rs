//! Batch runs: a named queue of leads with per-item status, persisted so
//! a run survives process restarts and soft pauses without losing or
//! duplicating work.

pub mod driver;

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    InFlight,
    Done,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct BatchRun {
    pub id: String,
    pub name: String,
    pub status: RunStatus,
    pub pause_requested: bool,
    pub auto_pause_items: u32,
    pub processed_count: i64,
    pub total_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemCounts {
    pub queued: i64,
    pub in_flight: i64,
    pub done: i64,
    pub failed: i64,
}

/// Per-item result summary written when an item finishes.
#[derive(Debug, Clone, Default)]
pub struct ItemResult {
    pub cached: bool,
    pub cost_cents: i64,
    pub phones_found: i64,
    pub emails_found: i64,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Run operations
// ---------------------------------------------------------------------------

/// Create a run with its queued items. Duplicate lead ids are collapsed.
pub fn create_run(
    db: &Database,
    name: &str,
    lead_ids: &[String],
    auto_pause_items: u32,
) -> Result<BatchRun, rusqlite::Error> {
    let id = Uuid::new_v4().to_string();

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO batch_runs (id, name, auto_pause_items, total_count) \
             VALUES (?1, ?2, ?3, 0)",
            params![id, name, auto_pause_items],
        )?;

        let mut position = 0i64;
        for lead_id in lead_ids {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO batch_run_items (run_id, lead_id, position) \
                 VALUES (?1, ?2, ?3)",
                params![id, lead_id, position],
            )?;
            position += inserted as i64;
        }

        conn.execute(
            "UPDATE batch_runs SET total_count = \
               (SELECT COUNT(*) FROM batch_run_items WHERE run_id = ?1) \
             WHERE id = ?1",
            [&id],
        )?;
        Ok(())
    })?;

    get_run(db, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get_run(db: &Database, run_id: &str) -> Result<Option<BatchRun>, rusqlite::Error> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT id, name, status, pause_requested, auto_pause_items, processed_count, \
                    total_count, report_json, artifact_path, created_at \
             FROM batch_runs WHERE id = ?1",
            [run_id],
            |row| {
                Ok(BatchRun {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    status: RunStatus::parse(&row.get::<_, String>(2)?),
                    pause_requested: row.get::<_, i64>(3)? != 0,
                    auto_pause_items: row.get::<_, i64>(4)? as u32,
                    processed_count: row.get(5)?,
                    total_count: row.get(6)?,
                    report_json: row.get(7)?,
                    artifact_path: row.get(8)?,
                    created_at: row.get(9)?,
                })
            },
        )
        .optional()
    })
}

pub fn list_runs(db: &Database) -> Result<Vec<BatchRun>, rusqlite::Error> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, name, status, pause_requested, auto_pause_items, processed_count, \
                    total_count, report_json, artifact_path, created_at \
             FROM batch_runs ORDER BY created_at DESC, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BatchRun {
                id: row.get(0)?,
                name: row.get(1)?,
                status: RunStatus::parse(&row.get::<_, String>(2)?),
                pause_requested: row.get::<_, i64>(3)? != 0,
                auto_pause_items: row.get::<_, i64>(4)? as u32,
                processed_count: row.get(5)?,
                total_count: row.get(6)?,
                report_json: row.get(7)?,
                artifact_path: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?;
        rows.collect()
    })
}

/// Set or clear the soft-pause flag. Clearing it also flips a paused run
/// back to running so the driver loop proceeds.
pub fn set_pause_requested(
    db: &Database,
    run_id: &str,
    paused: bool,
) -> Result<(), rusqlite::Error> {
    db.with_conn(|conn| {
        if paused {
            conn.execute(
                "UPDATE batch_runs SET pause_requested = 1, updated_at = datetime('now') \
                 WHERE id = ?1",
                [run_id],
            )?;
        } else {
            conn.execute(
                "UPDATE batch_runs SET pause_requested = 0, \
                   status = CASE WHEN status = 'paused' THEN 'running' ELSE status END, \
                   updated_at = datetime('now') \
                 WHERE id = ?1",
                [run_id],
            )?;
        }
        Ok(())
    })
}

pub fn set_status(db: &Database, run_id: &str, status: RunStatus) -> Result<(), rusqlite::Error> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE batch_runs SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![run_id, status.as_str()],
        )?;
        Ok(())
    })
}

pub fn finish_run(
    db: &Database,
    run_id: &str,
    report_json: &str,
    artifact_path: Option<&str>,
) -> Result<(), rusqlite::Error> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE batch_runs SET status = 'completed', report_json = ?2, \
               artifact_path = ?3, updated_at = datetime('now') \
             WHERE id = ?1",
            params![run_id, report_json, artifact_path],
        )?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Item operations
// ---------------------------------------------------------------------------

/// Claim the next workable item: a stale in-flight item first (safe to
/// re-pick after a crash, the orchestrator is idempotent via the cache),
/// then the lowest-position queued item. Marks the claim in the same
/// statement batch so two drivers cannot double-claim.
pub fn claim_next_item(db: &Database, run_id: &str) -> Result<Option<String>, rusqlite::Error> {
    db.with_conn(|conn| {
        let candidate: Option<String> = conn
            .query_row(
                "SELECT lead_id FROM batch_run_items \
                 WHERE run_id = ?1 AND status IN ('queued', 'in_flight') \
                 ORDER BY CASE status WHEN 'in_flight' THEN 0 ELSE 1 END, position \
                 LIMIT 1",
                [run_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(lead_id) = candidate else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE batch_run_items SET status = 'in_flight', updated_at = datetime('now') \
             WHERE run_id = ?1 AND lead_id = ?2",
            params![run_id, lead_id],
        )?;
        Ok(Some(lead_id))
    })
}

/// Record a finished item (done or failed) and bump the run's processed
/// counter. The transition is idempotent: finishing an already-finished
/// item is a no-op.
pub fn finish_item(
    db: &Database,
    run_id: &str,
    lead_id: &str,
    status: ItemStatus,
    result: &ItemResult,
) -> Result<(), rusqlite::Error> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE batch_run_items SET status = ?3, error = ?4, cached = ?5, \
               cost_cents = ?6, phones_found = ?7, emails_found = ?8, \
               updated_at = datetime('now') \
             WHERE run_id = ?1 AND lead_id = ?2 AND status = 'in_flight'",
            params![
                run_id,
                lead_id,
                status.as_str(),
                result.error,
                result.cached as i64,
                result.cost_cents,
                result.phones_found,
                result.emails_found,
            ],
        )?;

        if updated > 0 {
            conn.execute(
                "UPDATE batch_runs SET processed_count = processed_count + 1, \
                   updated_at = datetime('now') WHERE id = ?1",
                [run_id],
            )?;
        }
        Ok(())
    })
}

/// Put an in-flight item back to queued (used when the driver pauses
/// before processing a claimed item).
pub fn requeue_item(db: &Database, run_id: &str, lead_id: &str) -> Result<(), rusqlite::Error> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE batch_run_items SET status = 'queued', updated_at = datetime('now') \
             WHERE run_id = ?1 AND lead_id = ?2 AND status = 'in_flight'",
            params![run_id, lead_id],
        )?;
        Ok(())
    })
}

pub fn item_counts(db: &Database, run_id: &str) -> Result<ItemCounts, rusqlite::Error> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM batch_run_items WHERE run_id = ?1 GROUP BY status",
        )?;
        let mut counts = ItemCounts::default();
        let rows = stmt.query_map([run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "queued" => counts.queued = count,
                "in_flight" => counts.in_flight = count,
                "done" => counts.done = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }
        Ok(counts)
    })
}

/// Per-item rows for the completion report and CSV artifact.
pub fn item_rows(
    db: &Database,
    run_id: &str,
) -> Result<Vec<(String, String, bool, i64, i64, i64, Option<String>)>, rusqlite::Error> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT lead_id, status, cached, cost_cents, phones_found, emails_found, error \
             FROM batch_run_items WHERE run_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map([run_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get::<_, i64>(2)? != 0,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;
        rows.collect()
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
