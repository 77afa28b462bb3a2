//! In-process cache tier.
//!
//! A plain map with a short fixed TTL, evicted lazily on read. Purely
//! advisory: losing it on restart costs nothing but an L2 read.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::cache::CachedContacts;

/// Fixed L1 lifetime; bounds staleness within a single process while L2
/// stays authoritative across restarts.
pub const L1_TTL: Duration = Duration::from_secs(600);

struct L1Entry {
    contacts: CachedContacts,
    expires_at: Instant,
}

/// Short-TTL in-memory map keyed `provider:signature`.
#[derive(Default)]
pub struct L1Cache {
    entries: Mutex<HashMap<String, L1Entry>>,
}

impl L1Cache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(provider: &str, signature: &str) -> String {
        format!("{provider}:{signature}")
    }

    pub fn get(&self, provider: &str, signature: &str) -> Option<CachedContacts> {
        let key = Self::key(provider, signature);
        let mut entries = self.entries.lock().expect("l1 mutex poisoned");

        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.contacts.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, provider: &str, signature: &str, contacts: CachedContacts) {
        let key = Self::key(provider, signature);
        let mut entries = self.entries.lock().expect("l1 mutex poisoned");
        entries.insert(
            key,
            L1Entry {
                contacts,
                expires_at: Instant::now() + L1_TTL,
            },
        );
    }

    #[cfg(test)]
    fn put_with_ttl(&self, provider: &str, signature: &str, contacts: CachedContacts, ttl: Duration) {
        let key = Self::key(provider, signature);
        let mut entries = self.entries.lock().expect("l1 mutex poisoned");
        entries.insert(
            key,
            L1Entry {
                contacts,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contacts() -> CachedContacts {
        CachedContacts {
            phones: Vec::new(),
            emails: Vec::new(),
        }
    }

    #[test]
    fn test_get_miss() {
        let cache = L1Cache::new();
        assert!(cache.get("batchdata", "sig").is_none());
    }

    #[test]
    fn test_put_then_get() {
        let cache = L1Cache::new();
        cache.put("batchdata", "sig", contacts());
        assert!(cache.get("batchdata", "sig").is_some());
        // Keyed by provider too.
        assert!(cache.get("directskip", "sig").is_none());
    }

    #[test]
    fn test_expired_entry_evicted_on_read() {
        let cache = L1Cache::new();
        cache.put_with_ttl("batchdata", "sig", contacts(), Duration::from_millis(0));
        assert!(cache.get("batchdata", "sig").is_none());
    }
}
