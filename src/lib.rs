pub mod api;
pub mod batch;
pub mod cache;
pub mod config;
pub mod db;
pub mod dnc;
pub mod enrich;
pub mod error;
pub mod guardrails;
pub mod providers;
pub mod signature;
pub mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::cache::TraceCache;
use crate::config::Config;
use crate::db::Database;
use crate::enrich::Orchestrator;
use crate::guardrails::GuardrailSet;
use crate::providers::ProviderRegistry;

pub use crate::error::{ApiResult, AppError};

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub orchestrator: Arc<Orchestrator>,
    pub guardrails: Arc<GuardrailSet>,
    pub registry: Arc<ProviderRegistry>,
    pub cache: Arc<TraceCache>,
    /// Live batch-run driver tasks, so resume can tell whether a loop is
    /// still polling or a fresh one must be spawned.
    run_drivers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        db: Database,
        orchestrator: Arc<Orchestrator>,
        guardrails: Arc<GuardrailSet>,
        registry: Arc<ProviderRegistry>,
        cache: Arc<TraceCache>,
    ) -> Self {
        Self {
            config,
            db,
            orchestrator,
            guardrails,
            registry,
            cache,
            run_drivers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a batch driver loop for the given run and track its handle.
    pub fn spawn_run_driver(&self, run_id: &str) {
        let handle = batch::driver::spawn_run(
            self.db.clone(),
            Arc::clone(&self.orchestrator),
            self.config.batch.clone(),
            run_id.to_string(),
        );
        let mut drivers = self.run_drivers.lock().expect("driver map poisoned");
        drivers.retain(|_, h| !h.is_finished());
        drivers.insert(run_id.to_string(), handle);
    }

    /// Whether a driver loop for this run is still alive (possibly just
    /// polling in the paused state).
    pub fn has_live_driver(&self, run_id: &str) -> bool {
        let drivers = self.run_drivers.lock().expect("driver map poisoned");
        drivers.get(run_id).is_some_and(|h| !h.is_finished())
    }
}
