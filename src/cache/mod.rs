//! Two-tier lookup cache keyed by (provider, idempotency signature).
//!
//! L1 is a short-TTL in-process map; L2 is the persistent `trace_cache`
//! table with a configurable TTL (default 7 days). A hit in either tier
//! short-circuits the whole orchestration: no guardrail checks, no
//! provider call, cost 0. Disabling L1 changes performance only, never
//! correctness.

pub mod l1;
pub mod store;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::providers::types::{FoundEmail, FoundPhone};

use self::l1::L1Cache;
use self::store::CacheStore;

// ---------------------------------------------------------------------------
// Cached value
// ---------------------------------------------------------------------------

/// The parsed contact payload stored per cache entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedContacts {
    pub phones: Vec<FoundPhone>,
    pub emails: Vec<FoundEmail>,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CacheStats {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// TraceCache -- public facade
// ---------------------------------------------------------------------------

pub struct TraceCache {
    l1: Option<L1Cache>,
    store: CacheStore,
    ttl_days: u32,
    stats: CacheStats,
}

impl TraceCache {
    pub fn new(db: Database, ttl_days: u32, l1_enabled: bool) -> Self {
        Self {
            l1: l1_enabled.then(L1Cache::new),
            store: CacheStore::new(db),
            ttl_days,
            stats: CacheStats::default(),
        }
    }

    /// Look up parsed contacts. L1 first, then L2; an L2 hit populates L1
    /// before returning.
    pub fn get(
        &self,
        provider: &str,
        signature: &str,
    ) -> Result<Option<CachedContacts>, rusqlite::Error> {
        if let Some(ref l1) = self.l1 {
            if let Some(contacts) = l1.get(provider, signature) {
                self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(contacts));
            }
        }

        match self.store.lookup(provider, signature)? {
            Some(contacts) => {
                self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
                if let Some(ref l1) = self.l1 {
                    l1.put(provider, signature, contacts.clone());
                }
                Ok(Some(contacts))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Write-through on a successful provider call: upsert L2 with a fresh
    /// TTL and refresh L1.
    pub fn put(
        &self,
        provider: &str,
        signature: &str,
        raw_response: &str,
        contacts: &CachedContacts,
    ) -> Result<(), rusqlite::Error> {
        self.store
            .upsert(provider, signature, raw_response, contacts, self.ttl_days)?;
        if let Some(ref l1) = self.l1 {
            l1.put(provider, signature, contacts.clone());
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
