//! Batch run driver.
//!
//! A background loop that pulls one item at a time, invokes the
//! orchestrator with retries and fallback disabled, and writes per-item
//! status. The soft-pause flag is polled between items; setting it makes
//! the loop sleep and re-poll, clearing it resumes exactly where it
//! stopped. On completion the driver emits a structured report and a CSV
//! artifact.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};

use crate::batch::{self, ItemResult, ItemStatus, RunStatus};
use crate::config::BatchConfig;
use crate::db::Database;
use crate::enrich::{EnrichError, EnrichmentOptions, Orchestrator};
use crate::guardrails::GuardrailError;

/// Spawn the driver loop for a run. The handle completes when the run
/// reaches a terminal state; a paused run keeps the loop alive, polling.
pub fn spawn_run(
    db: Database,
    orchestrator: Arc<Orchestrator>,
    config: BatchConfig,
    run_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run_loop(&db, &orchestrator, &config, &run_id).await {
            error!(run_id = %run_id, error = %e, "Batch run driver failed");
            let _ = batch::set_status(&db, &run_id, RunStatus::Failed);
        }
    })
}

async fn run_loop(
    db: &Database,
    orchestrator: &Orchestrator,
    config: &BatchConfig,
    run_id: &str,
) -> Result<(), rusqlite::Error> {
    info!(run_id, "Batch run driver started");
    let poll = Duration::from_millis(config.pause_poll_ms.max(10));
    let mut processed_this_session = 0u32;

    loop {
        let Some(run) = batch::get_run(db, run_id)? else {
            warn!(run_id, "Run disappeared, stopping driver");
            return Ok(());
        };

        // Soft pause: sleep and re-poll between items. No work is lost;
        // the next claim resumes where the queue left off.
        if run.pause_requested {
            if run.status != RunStatus::Paused {
                info!(run_id, "Run paused");
                batch::set_status(db, run_id, RunStatus::Paused)?;
            }
            tokio::time::sleep(poll).await;
            continue;
        }
        if run.status == RunStatus::Paused {
            info!(run_id, "Run resumed");
            batch::set_status(db, run_id, RunStatus::Running)?;
        }

        let Some(lead_id) = batch::claim_next_item(db, run_id)? else {
            finalize_run(db, config, run_id)?;
            return Ok(());
        };

        // Retries and fallback are disabled inside a run to bound its
        // duration; idempotent caching makes re-picking safe.
        let options = EnrichmentOptions {
            max_retries: Some(0),
            use_fallback: Some(false),
            run_id: Some(run_id.to_string()),
            ..Default::default()
        };

        match orchestrator.enrich(&lead_id, &options).await {
            Ok(outcome) => {
                let status = if outcome.success {
                    ItemStatus::Done
                } else {
                    ItemStatus::Failed
                };
                batch::finish_item(
                    db,
                    run_id,
                    &lead_id,
                    status,
                    &ItemResult {
                        cached: outcome.cached,
                        cost_cents: outcome.cost_cents,
                        phones_found: outcome.phones.len() as i64,
                        emails_found: outcome.emails.len() as i64,
                        error: outcome.error,
                    },
                )?;
            }
            Err(EnrichError::Guardrail(GuardrailError::BudgetPaused { .. })) => {
                // The whole day's budget is gone; every further item would
                // fail fast too. Requeue the claim and soft-pause the run
                // so it can resume after the cap resets.
                warn!(run_id, lead_id = %lead_id, "Budget paused; pausing run");
                batch::requeue_item(db, run_id, &lead_id)?;
                batch::set_pause_requested(db, run_id, true)?;
                continue;
            }
            Err(e) => {
                batch::finish_item(
                    db,
                    run_id,
                    &lead_id,
                    ItemStatus::Failed,
                    &ItemResult {
                        error: Some(e.to_string()),
                        ..Default::default()
                    },
                )?;
            }
        }

        processed_this_session += 1;
        if run.auto_pause_items > 0 && processed_this_session % run.auto_pause_items == 0 {
            info!(
                run_id,
                processed = processed_this_session,
                "Auto-pausing for external inspection"
            );
            batch::set_pause_requested(db, run_id, true)?;
        }
    }
}

/// Write the completion report and CSV artifact, then mark the run
/// completed.
fn finalize_run(
    db: &Database,
    config: &BatchConfig,
    run_id: &str,
) -> Result<(), rusqlite::Error> {
    let counts = batch::item_counts(db, run_id)?;
    let rows = batch::item_rows(db, run_id)?;

    let total_cost: i64 = rows.iter().map(|r| r.3).sum();
    let cached_hits = rows.iter().filter(|r| r.2).count();

    let report = json!({
        "run_id": run_id,
        "done": counts.done,
        "failed": counts.failed,
        "cached_hits": cached_hits,
        "total_cost_cents": total_cost,
        "items": rows.len(),
    });

    let artifact_path = match write_artifact(&config.artifact_dir, run_id, &rows) {
        Ok(path) => Some(path.display().to_string()),
        Err(e) => {
            // The report in the database still stands; the CSV is a
            // convenience artifact.
            warn!(run_id, error = %e, "Failed to write CSV artifact");
            None
        }
    };

    batch::finish_run(db, run_id, &report.to_string(), artifact_path.as_deref())?;
    info!(
        run_id,
        done = counts.done,
        failed = counts.failed,
        total_cost_cents = total_cost,
        "Batch run completed"
    );
    Ok(())
}

/// One CSV line per lead summarizing contacts found.
fn write_artifact(
    dir: &PathBuf,
    run_id: &str,
    rows: &[(String, String, bool, i64, i64, i64, Option<String>)],
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("run-{run_id}.csv"));

    let mut out = String::from("lead_id,status,cached,phones_found,emails_found,cost_cents,error\n");
    for (lead_id, status, cached, cost, phones, emails, error) in rows {
        let error = error.as_deref().unwrap_or("").replace([',', '\n'], " ");
        out.push_str(&format!(
            "{lead_id},{status},{cached},{phones},{emails},{cost},{error}\n"
        ));
    }
    std::fs::write(&path, out)?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
