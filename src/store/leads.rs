//! Lead-store collaborator.
//!
//! Leads are owned by the CRM subsystem. This service reads a lead's
//! address/owner and writes back rollup fields; it never creates or
//! deletes leads.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::Database;

#[derive(Debug, Clone)]
pub struct Lead {
    pub id: String,
    pub address: String,
    pub owner_name: String,
    pub needs_refresh: bool,
}

/// Read the enrichment-relevant slice of a lead.
pub fn get_lead(db: &Database, lead_id: &str) -> Result<Option<Lead>, rusqlite::Error> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT id, address, owner_name, needs_refresh FROM leads WHERE id = ?1",
            [lead_id],
            |row| {
                Ok(Lead {
                    id: row.get(0)?,
                    address: row.get(1)?,
                    owner_name: row.get(2)?,
                    needs_refresh: row.get::<_, i64>(3)? != 0,
                })
            },
        )
        .optional()
    })
}

/// Write contact rollups back onto the lead row after a successful
/// enrichment.
#[allow(clippy::too_many_arguments)]
pub fn update_rollups(
    db: &Database,
    lead_id: &str,
    phone_count: i64,
    email_count: i64,
    has_dnc: bool,
    primary_phone: Option<&str>,
    primary_email: Option<&str>,
    cache_until: DateTime<Utc>,
) -> Result<(), rusqlite::Error> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE leads SET \
               phone_count = ?2, email_count = ?3, has_dnc = ?4, \
               primary_phone = ?5, primary_email = ?6, cache_until = ?7, \
               updated_at = datetime('now') \
             WHERE id = ?1",
            params![
                lead_id,
                phone_count,
                email_count,
                has_dnc as i64,
                primary_phone,
                primary_email,
                cache_until.to_rfc3339(),
            ],
        )?;
        Ok(())
    })
}

/// Clear the needs-refresh flag (set by force-refresh requests). Cache
/// entries are never deleted here; the next success overwrites them.
pub fn clear_needs_refresh(db: &Database, lead_id: &str) -> Result<(), rusqlite::Error> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE leads SET needs_refresh = 0, updated_at = datetime('now') WHERE id = ?1",
            [lead_id],
        )?;
        Ok(())
    })
}

#[cfg(test)]
pub fn insert_test_lead(db: &Database, id: &str, address: &str, owner: &str) {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO leads (id, address, owner_name) VALUES (?1, ?2, ?3)",
            params![id, address, owner],
        )?;
        Ok(())
    })
    .unwrap();
}
