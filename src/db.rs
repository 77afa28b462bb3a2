use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Thread-safe database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path with WAL mode.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, rusqlite::Error>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self.conn.lock().expect("database mutex poisoned");
        f(&conn)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
-- Leads are owned by the CRM subsystem; this service only reads the
-- address/owner columns and writes back the rollup columns.
CREATE TABLE IF NOT EXISTS leads (
    id              TEXT PRIMARY KEY,
    address         TEXT NOT NULL DEFAULT '',
    owner_name      TEXT NOT NULL DEFAULT '',
    phone_count     INTEGER NOT NULL DEFAULT 0,
    email_count     INTEGER NOT NULL DEFAULT 0,
    has_dnc         INTEGER NOT NULL DEFAULT 0,
    primary_phone   TEXT,
    primary_email   TEXT,
    cache_until     TEXT,
    needs_refresh   INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

-- L2 cache: source of truth for "have we already paid for this lookup".
CREATE TABLE IF NOT EXISTS trace_cache (
    provider        TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    payload_hash    TEXT NOT NULL,
    raw_response    TEXT NOT NULL DEFAULT '',
    contacts_json   TEXT NOT NULL,
    ttl_expires_at  TEXT NOT NULL,
    last_seen       TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (provider, idempotency_key)
);

-- One row per physical network call; append-only except the late
-- idempotency back-fill on the most recent row for a lead+provider.
CREATE TABLE IF NOT EXISTS provider_calls (
    id              TEXT PRIMARY KEY,
    lead_id         TEXT NOT NULL,
    provider        TEXT NOT NULL,
    request_id      TEXT,
    cost_cents      INTEGER NOT NULL DEFAULT 0,
    duration_ms     INTEGER NOT NULL DEFAULT 0,
    status          TEXT NOT NULL DEFAULT 'success' CHECK (status IN ('success', 'error')),
    error_message   TEXT,
    idempotency_key TEXT,
    payload_hash    TEXT,
    run_id          TEXT,
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_provider_calls_lead ON provider_calls(lead_id);
CREATE INDEX IF NOT EXISTS idx_provider_calls_provider_day ON provider_calls(provider, created_at);

-- One row per orchestration attempt (cache hits included); debugging
-- surface only, never used to recompute billing.
CREATE TABLE IF NOT EXISTS enrichment_audit (
    id                TEXT PRIMARY KEY,
    lead_id           TEXT NOT NULL,
    provider          TEXT NOT NULL,
    success           INTEGER NOT NULL DEFAULT 0,
    cost_cents        INTEGER NOT NULL DEFAULT 0,
    phones_found      INTEGER NOT NULL DEFAULT 0,
    emails_found      INTEGER NOT NULL DEFAULT 0,
    cached            INTEGER NOT NULL DEFAULT 0,
    error             TEXT,
    request_snapshot  TEXT,
    response_snapshot TEXT,
    zip_hint_used     TEXT,
    attempt_reason    TEXT,
    run_id            TEXT,
    created_at        TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_enrichment_audit_lead ON enrichment_audit(lead_id);

-- Normalized contact tables, deduplicated by natural key.
CREATE TABLE IF NOT EXISTS lead_phones (
    lead_id         TEXT NOT NULL,
    number          TEXT NOT NULL,
    source          TEXT NOT NULL,
    phone_type      TEXT,
    carrier         TEXT,
    is_primary      INTEGER NOT NULL DEFAULT 0,
    is_do_not_call  INTEGER NOT NULL DEFAULT 0,
    confidence      REAL NOT NULL DEFAULT 0.0,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (lead_id, number, source)
);

CREATE TABLE IF NOT EXISTS lead_emails (
    lead_id         TEXT NOT NULL,
    address         TEXT NOT NULL,
    source          TEXT NOT NULL,
    email_type      TEXT,
    is_primary      INTEGER NOT NULL DEFAULT 0,
    confidence      REAL NOT NULL DEFAULT 0.0,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (lead_id, address, source)
);

-- Legacy single-row-per-lead storage; a derived cache of the normalized
-- tables, kept for backward compatibility.
CREATE TABLE IF NOT EXISTS skip_trace_results (
    lead_id         TEXT PRIMARY KEY,
    provider        TEXT NOT NULL,
    phones_json     TEXT NOT NULL DEFAULT '[]',
    emails_json     TEXT NOT NULL DEFAULT '[]',
    traced_at       TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS quota_usage (
    provider        TEXT NOT NULL,
    day             TEXT NOT NULL,
    used            INTEGER NOT NULL DEFAULT 0,
    quota           INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (provider, day)
);

CREATE TABLE IF NOT EXISTS batch_runs (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL DEFAULT '',
    status           TEXT NOT NULL DEFAULT 'running'
                     CHECK (status IN ('running', 'paused', 'completed', 'failed')),
    pause_requested  INTEGER NOT NULL DEFAULT 0,
    auto_pause_items INTEGER NOT NULL DEFAULT 0,
    processed_count  INTEGER NOT NULL DEFAULT 0,
    total_count      INTEGER NOT NULL DEFAULT 0,
    report_json      TEXT,
    artifact_path    TEXT,
    created_at       TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at       TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS batch_run_items (
    run_id          TEXT NOT NULL REFERENCES batch_runs(id) ON DELETE CASCADE,
    lead_id         TEXT NOT NULL,
    position        INTEGER NOT NULL DEFAULT 0,
    status          TEXT NOT NULL DEFAULT 'queued'
                    CHECK (status IN ('queued', 'in_flight', 'done', 'failed')),
    error           TEXT,
    cached          INTEGER NOT NULL DEFAULT 0,
    cost_cents      INTEGER NOT NULL DEFAULT 0,
    phones_found    INTEGER NOT NULL DEFAULT 0,
    emails_found    INTEGER NOT NULL DEFAULT 0,
    updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (run_id, lead_id)
);
CREATE INDEX IF NOT EXISTS idx_batch_run_items_status ON batch_run_items(run_id, status);
"#;
