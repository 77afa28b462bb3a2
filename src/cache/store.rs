//! Persistent cache tier (SQLite).
//!
//! The `trace_cache` table is the source of truth for "have we already
//! paid for this lookup". Rows are upserted on successful calls and
//! filtered by TTL at read time; expiry never deletes rows.

use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::cache::CachedContacts;
use crate::db::Database;

pub struct CacheStore {
    db: Database,
}

impl CacheStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Look up a live entry by (provider, idempotency key). Expired rows
    /// are ignored, and a hit refreshes `last_seen`.
    pub fn lookup(
        &self,
        provider: &str,
        key: &str,
    ) -> Result<Option<CachedContacts>, rusqlite::Error> {
        let row: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT contacts_json FROM trace_cache \
                 WHERE provider = ?1 AND idempotency_key = ?2 \
                   AND ttl_expires_at > datetime('now')",
                params![provider, key],
                |row| row.get(0),
            )
            .optional()
        })?;

        let Some(json) = row else {
            return Ok(None);
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE trace_cache SET last_seen = datetime('now') \
                 WHERE provider = ?1 AND idempotency_key = ?2",
                params![provider, key],
            )?;
            Ok(())
        })?;

        match serde_json::from_str(&json) {
            Ok(contacts) => Ok(Some(contacts)),
            Err(e) => {
                // A corrupt row behaves like a miss; the next success
                // overwrites it.
                tracing::warn!(provider, key, error = %e, "Corrupt cache row, treating as miss");
                Ok(None)
            }
        }
    }

    /// Upsert an entry with a fresh TTL.
    pub fn upsert(
        &self,
        provider: &str,
        key: &str,
        raw_response: &str,
        contacts: &CachedContacts,
        ttl_days: u32,
    ) -> Result<(), rusqlite::Error> {
        let contacts_json = serde_json::to_string(contacts).unwrap_or_else(|_| "{}".into());
        let payload_hash = hash_payload(raw_response);
        let ttl_modifier = format!("+{ttl_days} days");

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO trace_cache \
                   (provider, idempotency_key, payload_hash, raw_response, contacts_json, ttl_expires_at, last_seen) \
                 VALUES (?1, ?2, ?3, ?4, ?5, datetime('now', ?6), datetime('now')) \
                 ON CONFLICT(provider, idempotency_key) DO UPDATE SET \
                   payload_hash = excluded.payload_hash, \
                   raw_response = excluded.raw_response, \
                   contacts_json = excluded.contacts_json, \
                   ttl_expires_at = excluded.ttl_expires_at, \
                   last_seen = datetime('now')",
                params![provider, key, payload_hash, raw_response, contacts_json, ttl_modifier],
            )?;
            Ok(())
        })
    }

    /// Whether a live entry exists (used by tests and analytics).
    pub fn contains(&self, provider: &str, key: &str) -> Result<bool, rusqlite::Error> {
        let count: i64 = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM trace_cache \
                 WHERE provider = ?1 AND idempotency_key = ?2 \
                   AND ttl_expires_at > datetime('now')",
                params![provider, key],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }
}

/// SHA-256 hex digest of the raw vendor payload.
pub fn hash_payload(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::FoundPhone;

    fn contacts() -> CachedContacts {
        CachedContacts {
            phones: vec![FoundPhone {
                number: "2175550123".into(),
                is_primary: true,
                ..Default::default()
            }],
            emails: Vec::new(),
        }
    }

    #[test]
    fn test_lookup_miss() {
        let store = CacheStore::new(Database::open_in_memory().unwrap());
        assert!(store.lookup("batchdata", "sig-1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_then_lookup() {
        let store = CacheStore::new(Database::open_in_memory().unwrap());
        store.upsert("batchdata", "sig-1", "{}", &contacts(), 7).unwrap();

        let hit = store.lookup("batchdata", "sig-1").unwrap().unwrap();
        assert_eq!(hit.phones[0].number, "2175550123");

        // Keyed by provider.
        assert!(store.lookup("directskip", "sig-1").unwrap().is_none());
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let db = Database::open_in_memory().unwrap();
        let store = CacheStore::new(db.clone());
        store.upsert("batchdata", "sig-1", "{}", &contacts(), 7).unwrap();

        // Force the TTL into the past; the row stays but reads miss.
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE trace_cache SET ttl_expires_at = datetime('now', '-1 day')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        assert!(store.lookup("batchdata", "sig-1").unwrap().is_none());
        assert!(!store.contains("batchdata", "sig-1").unwrap());

        let rows: i64 = db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM trace_cache", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_upsert_overwrites_and_refreshes_ttl() {
        let db = Database::open_in_memory().unwrap();
        let store = CacheStore::new(db.clone());
        store.upsert("batchdata", "sig-1", "{\"v\":1}", &contacts(), 7).unwrap();

        let mut newer = contacts();
        newer.phones[0].number = "2175550999".into();
        store.upsert("batchdata", "sig-1", "{\"v\":2}", &newer, 7).unwrap();

        let hit = store.lookup("batchdata", "sig-1").unwrap().unwrap();
        assert_eq!(hit.phones[0].number, "2175550999");

        let rows: i64 = db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM trace_cache", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_hash_payload_deterministic() {
        assert_eq!(hash_payload("abc"), hash_payload("abc"));
        assert_ne!(hash_payload("abc"), hash_payload("abd"));
    }
}
