//! Normalized contact persistence.
//!
//! Phones and emails are upserted by natural key (lead_id, value, source).
//! `is_primary` is lead-level: the first successful write wins unless a
//! later row carries strictly higher confidence. The legacy
//! `skip_trace_results` row is rebuilt from the normalized tables after
//! every write; it is a derived cache, never a source of truth.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;

use crate::db::Database;
use crate::providers::types::{FoundEmail, FoundPhone};

/// What a persistence pass found, used for the lead rollup columns.
#[derive(Debug, Clone, Default)]
pub struct ContactSummary {
    pub phone_count: i64,
    pub email_count: i64,
    pub has_dnc: bool,
    pub primary_phone: Option<String>,
    pub primary_email: Option<String>,
}

/// Upsert the found contacts and rebuild the lead's derived rows.
pub fn persist_contacts(
    db: &Database,
    lead_id: &str,
    source: &str,
    phones: &[FoundPhone],
    emails: &[FoundEmail],
) -> Result<ContactSummary, rusqlite::Error> {
    db.with_conn(|conn| {
        for phone in phones {
            upsert_phone(conn, lead_id, source, phone)?;
        }
        for email in emails {
            upsert_email(conn, lead_id, source, email)?;
        }

        if let Some(candidate) = phones.first() {
            settle_primary_phone(conn, lead_id, &candidate.number, candidate.confidence)?;
        }
        if let Some(candidate) = emails.first() {
            settle_primary_email(conn, lead_id, &candidate.address, candidate.confidence)?;
        }

        rebuild_legacy_row(conn, lead_id, source)?;
        summarize(conn, lead_id)
    })
}

fn upsert_phone(
    conn: &Connection,
    lead_id: &str,
    source: &str,
    phone: &FoundPhone,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO lead_phones \
           (lead_id, number, source, phone_type, carrier, is_do_not_call, confidence) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(lead_id, number, source) DO UPDATE SET \
           phone_type = excluded.phone_type, \
           carrier = excluded.carrier, \
           is_do_not_call = excluded.is_do_not_call, \
           confidence = max(confidence, excluded.confidence), \
           updated_at = datetime('now')",
        params![
            lead_id,
            phone.number,
            source,
            phone.phone_type,
            phone.carrier,
            phone.is_do_not_call as i64,
            phone.confidence,
        ],
    )?;
    Ok(())
}

fn upsert_email(
    conn: &Connection,
    lead_id: &str,
    source: &str,
    email: &FoundEmail,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO lead_emails (lead_id, address, source, email_type, confidence) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(lead_id, address, source) DO UPDATE SET \
           email_type = excluded.email_type, \
           confidence = max(confidence, excluded.confidence), \
           updated_at = datetime('now')",
        params![lead_id, email.address, source, email.email_type, email.confidence],
    )?;
    Ok(())
}

/// First write wins; a later candidate takes over only with strictly
/// higher confidence.
fn settle_primary_phone(
    conn: &Connection,
    lead_id: &str,
    candidate: &str,
    confidence: f64,
) -> Result<(), rusqlite::Error> {
    let current: Option<(String, f64)> = conn
        .query_row(
            "SELECT number, confidence FROM lead_phones \
             WHERE lead_id = ?1 AND is_primary = 1 LIMIT 1",
            [lead_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match current {
        None => {
            conn.execute(
                "UPDATE lead_phones SET is_primary = 1 WHERE lead_id = ?1 AND number = ?2",
                params![lead_id, candidate],
            )?;
        }
        Some((number, existing)) if confidence > existing && number != candidate => {
            conn.execute(
                "UPDATE lead_phones SET is_primary = 0 WHERE lead_id = ?1",
                [lead_id],
            )?;
            conn.execute(
                "UPDATE lead_phones SET is_primary = 1 WHERE lead_id = ?1 AND number = ?2",
                params![lead_id, candidate],
            )?;
        }
        Some(_) => {}
    }
    Ok(())
}

fn settle_primary_email(
    conn: &Connection,
    lead_id: &str,
    candidate: &str,
    confidence: f64,
) -> Result<(), rusqlite::Error> {
    let current: Option<(String, f64)> = conn
        .query_row(
            "SELECT address, confidence FROM lead_emails \
             WHERE lead_id = ?1 AND is_primary = 1 LIMIT 1",
            [lead_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match current {
        None => {
            conn.execute(
                "UPDATE lead_emails SET is_primary = 1 WHERE lead_id = ?1 AND address = ?2",
                params![lead_id, candidate],
            )?;
        }
        Some((address, existing)) if confidence > existing && address != candidate => {
            conn.execute(
                "UPDATE lead_emails SET is_primary = 0 WHERE lead_id = ?1",
                [lead_id],
            )?;
            conn.execute(
                "UPDATE lead_emails SET is_primary = 1 WHERE lead_id = ?1 AND address = ?2",
                params![lead_id, candidate],
            )?;
        }
        Some(_) => {}
    }
    Ok(())
}

/// Rebuild the legacy single-row representation from the normalized tables.
fn rebuild_legacy_row(
    conn: &Connection,
    lead_id: &str,
    source: &str,
) -> Result<(), rusqlite::Error> {
    let mut phones = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT number, phone_type, is_primary, is_do_not_call FROM lead_phones \
             WHERE lead_id = ?1 ORDER BY is_primary DESC, number",
        )?;
        let rows = stmt.query_map([lead_id], |row| {
            Ok(json!({
                "number": row.get::<_, String>(0)?,
                "type": row.get::<_, Option<String>>(1)?,
                "isPrimary": row.get::<_, i64>(2)? != 0,
                "isDoNotCall": row.get::<_, i64>(3)? != 0,
            }))
        })?;
        for row in rows {
            phones.push(row?);
        }
    }

    let mut emails = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT address, is_primary FROM lead_emails \
             WHERE lead_id = ?1 ORDER BY is_primary DESC, address",
        )?;
        let rows = stmt.query_map([lead_id], |row| {
            Ok(json!({
                "address": row.get::<_, String>(0)?,
                "isPrimary": row.get::<_, i64>(1)? != 0,
            }))
        })?;
        for row in rows {
            emails.push(row?);
        }
    }

    conn.execute(
        "INSERT INTO skip_trace_results (lead_id, provider, phones_json, emails_json, traced_at) \
         VALUES (?1, ?2, ?3, ?4, datetime('now')) \
         ON CONFLICT(lead_id) DO UPDATE SET \
           provider = excluded.provider, \
           phones_json = excluded.phones_json, \
           emails_json = excluded.emails_json, \
           traced_at = excluded.traced_at",
        params![
            lead_id,
            source,
            serde_json::Value::Array(phones).to_string(),
            serde_json::Value::Array(emails).to_string(),
        ],
    )?;
    Ok(())
}

fn summarize(conn: &Connection, lead_id: &str) -> Result<ContactSummary, rusqlite::Error> {
    let (phone_count, has_dnc): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(MAX(is_do_not_call), 0) FROM lead_phones WHERE lead_id = ?1",
        [lead_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let email_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM lead_emails WHERE lead_id = ?1",
        [lead_id],
        |row| row.get(0),
    )?;
    let primary_phone: Option<String> = conn
        .query_row(
            "SELECT number FROM lead_phones WHERE lead_id = ?1 AND is_primary = 1 LIMIT 1",
            [lead_id],
            |row| row.get(0),
        )
        .optional()?;
    let primary_email: Option<String> = conn
        .query_row(
            "SELECT address FROM lead_emails WHERE lead_id = ?1 AND is_primary = 1 LIMIT 1",
            [lead_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(ContactSummary {
        phone_count,
        email_count,
        has_dnc: has_dnc != 0,
        primary_phone,
        primary_email,
    })
}

/// Stored contacts for a lead, for the read API.
pub fn load_contacts(
    db: &Database,
    lead_id: &str,
) -> Result<(Vec<FoundPhone>, Vec<FoundEmail>), rusqlite::Error> {
    db.with_conn(|conn| {
        let mut phones = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT number, phone_type, carrier, is_primary, is_do_not_call, confidence \
                 FROM lead_phones WHERE lead_id = ?1 ORDER BY is_primary DESC, number",
            )?;
            let rows = stmt.query_map([lead_id], |row| {
                Ok(FoundPhone {
                    number: row.get(0)?,
                    phone_type: row.get(1)?,
                    carrier: row.get(2)?,
                    is_primary: row.get::<_, i64>(3)? != 0,
                    is_do_not_call: row.get::<_, i64>(4)? != 0,
                    confidence: row.get(5)?,
                    can_call: None,
                    is_quiet_hours: None,
                })
            })?;
            for row in rows {
                phones.push(row?);
            }
        }

        let mut emails = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT address, email_type, is_primary, confidence \
                 FROM lead_emails WHERE lead_id = ?1 ORDER BY is_primary DESC, address",
            )?;
            let rows = stmt.query_map([lead_id], |row| {
                Ok(FoundEmail {
                    address: row.get(0)?,
                    email_type: row.get(1)?,
                    is_primary: row.get::<_, i64>(2)? != 0,
                    confidence: row.get(3)?,
                })
            })?;
            for row in rows {
                emails.push(row?);
            }
        }

        Ok((phones, emails))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn phone(number: &str, confidence: f64) -> FoundPhone {
        FoundPhone {
            number: number.into(),
            confidence,
            ..Default::default()
        }
    }

    fn email(address: &str) -> FoundEmail {
        FoundEmail {
            address: address.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_persist_dedupes_by_natural_key() {
        let db = Database::open_in_memory().unwrap();

        persist_contacts(&db, "lead-1", "batchdata", &[phone("111", 0.5)], &[]).unwrap();
        persist_contacts(&db, "lead-1", "batchdata", &[phone("111", 0.5)], &[]).unwrap();

        let summary = persist_contacts(&db, "lead-1", "batchdata", &[phone("111", 0.5)], &[]).unwrap();
        assert_eq!(summary.phone_count, 1);

        // Same number from another source is a distinct row.
        let summary = persist_contacts(&db, "lead-1", "directskip", &[phone("111", 0.0)], &[]).unwrap();
        assert_eq!(summary.phone_count, 2);
    }

    #[test]
    fn test_first_write_wins_primary() {
        let db = Database::open_in_memory().unwrap();

        let s1 = persist_contacts(&db, "lead-1", "batchdata", &[phone("111", 0.5)], &[]).unwrap();
        assert_eq!(s1.primary_phone.as_deref(), Some("111"));

        // Equal confidence does not steal primary.
        let s2 = persist_contacts(&db, "lead-1", "directskip", &[phone("222", 0.5)], &[]).unwrap();
        assert_eq!(s2.primary_phone.as_deref(), Some("111"));
    }

    #[test]
    fn test_higher_confidence_overwrites_primary() {
        let db = Database::open_in_memory().unwrap();

        persist_contacts(&db, "lead-1", "directskip", &[phone("111", 0.0)], &[]).unwrap();
        let s = persist_contacts(&db, "lead-1", "batchdata", &[phone("222", 0.9)], &[]).unwrap();
        assert_eq!(s.primary_phone.as_deref(), Some("222"));

        // Exactly one primary row remains.
        let primaries: i64 = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM lead_phones WHERE lead_id = 'lead-1' AND is_primary = 1",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(primaries, 1);
    }

    #[test]
    fn test_dnc_rollup() {
        let db = Database::open_in_memory().unwrap();
        let mut dnc = phone("333", 0.2);
        dnc.is_do_not_call = true;

        let summary =
            persist_contacts(&db, "lead-1", "batchdata", &[phone("111", 0.5), dnc], &[]).unwrap();
        assert!(summary.has_dnc);
    }

    #[test]
    fn test_legacy_row_mirrors_normalized_tables() {
        let db = Database::open_in_memory().unwrap();
        persist_contacts(
            &db,
            "lead-1",
            "batchdata",
            &[phone("111", 0.5)],
            &[email("owner@example.com")],
        )
        .unwrap();

        let (phones_json, emails_json): (String, String) = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT phones_json, emails_json FROM skip_trace_results WHERE lead_id = 'lead-1'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
            })
            .unwrap();

        let phones: serde_json::Value = serde_json::from_str(&phones_json).unwrap();
        assert_eq!(phones[0]["number"], "111");
        let emails: serde_json::Value = serde_json::from_str(&emails_json).unwrap();
        assert_eq!(emails[0]["address"], "owner@example.com");
    }

    #[test]
    fn test_load_contacts_round_trip() {
        let db = Database::open_in_memory().unwrap();
        persist_contacts(
            &db,
            "lead-1",
            "batchdata",
            &[phone("111", 0.5)],
            &[email("owner@example.com")],
        )
        .unwrap();

        let (phones, emails) = load_contacts(&db, "lead-1").unwrap();
        assert_eq!(phones.len(), 1);
        assert!(phones[0].is_primary);
        assert_eq!(emails[0].address, "owner@example.com");
    }
}
