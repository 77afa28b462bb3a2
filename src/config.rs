use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment
/// variables, so operational tooling can display them as locked.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "server.host") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// "production" (default) or "development". Demo mode is refused in
    /// production regardless of the demo flags.
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub guardrails: GuardrailConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub dnc: DncConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub demo: DemoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// L2 TTL in days.
    #[serde(default = "default_cache_ttl_days")]
    pub ttl_days: u32,
    /// Disabling L1 must not change correctness, only performance.
    #[serde(default = "default_true")]
    pub l1_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_cache_ttl_days(),
            l1_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardrailConfig {
    /// Daily spend ceiling in cents; 0 disables the cap.
    #[serde(default = "default_daily_budget_cents")]
    pub daily_budget_cents: i64,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
    /// Outbound calls per second across all providers.
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,
    /// Per-provider calls per day; 0 disables the quota.
    #[serde(default = "default_daily_quota")]
    pub daily_quota: i64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            daily_budget_cents: default_daily_budget_cents(),
            breaker_failure_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            rate_per_sec: default_rate_per_sec(),
            daily_quota: default_daily_quota(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_primary_provider")]
    pub primary_provider: String,
    #[serde(default)]
    pub fallback_enabled: bool,
    #[serde(default = "default_fallback_provider")]
    pub fallback_provider: String,
    /// Retries after the initial attempt, fixed delay, no backoff growth.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            primary_provider: default_primary_provider(),
            fallback_enabled: false,
            fallback_provider: default_fallback_provider(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batchdata: Option<VendorConfig>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directskip: Option<VendorConfig>,
}

/// Per-vendor connection settings. Auth header style is fixed per adapter;
/// only the endpoint, key and list price vary by deployment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VendorConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_cost_cents")]
    pub cost_cents: i64,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DncConfig {
    /// Compliance-checker base URL; unset disables per-phone annotation.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Auto-pause after this many processed items; 0 disables auto-pause.
    #[serde(default = "default_auto_pause_items")]
    pub auto_pause_items: u32,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Poll interval while a run is soft-paused.
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            auto_pause_items: default_auto_pause_items(),
            artifact_dir: default_artifact_dir(),
            pause_poll_ms: default_pause_poll_ms(),
        }
    }
}

/// Both flags must be set (and the environment non-production) before the
/// synthetic data path can activate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DemoConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_synthetic: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}
const fn default_port() -> u16 {
    7410
}
fn default_db_path() -> PathBuf {
    PathBuf::from("skiphound.db")
}
fn default_environment() -> String {
    "production".to_string()
}
const fn default_cache_ttl_days() -> u32 {
    7
}
const fn default_true() -> bool {
    true
}
const fn default_daily_budget_cents() -> i64 {
    10_000
}
const fn default_breaker_threshold() -> u32 {
    5
}
const fn default_breaker_cooldown_secs() -> u64 {
    60
}
const fn default_rate_per_sec() -> f64 {
    2.0
}
const fn default_daily_quota() -> i64 {
    500
}
fn default_primary_provider() -> String {
    "batchdata".to_string()
}
fn default_fallback_provider() -> String {
    "directskip".to_string()
}
const fn default_max_retries() -> u32 {
    2
}
const fn default_retry_delay_ms() -> u64 {
    1_000
}
const fn default_cost_cents() -> i64 {
    25
}
const fn default_auto_pause_items() -> u32 {
    0
}
fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}
const fn default_pause_poll_ms() -> u64 {
    1_000
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            environment: default_environment(),
            cache: CacheConfig::default(),
            guardrails: GuardrailConfig::default(),
            enrichment: EnrichmentConfig::default(),
            providers: ProvidersConfig::default(),
            dnc: DncConfig::default(),
            batch: BatchConfig::default(),
            demo: DemoConfig::default(),
            logging: LoggingConfig::default(),
            env_overrides: EnvOverrides::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `SKIPHOUND_` takes precedence
    /// over the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Whether the synthetic-data path may be used: both demo flags set and
    /// the service not configured for production.
    pub fn demo_active(&self) -> bool {
        self.demo.enabled && self.demo.allow_synthetic && self.environment != "production"
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }

        // -- Server --
        env_str!("server.host", "SKIPHOUND_SERVER_HOST", self.server.host);
        env_parse!("server.port", "SKIPHOUND_SERVER_PORT", self.server.port);

        // -- Database / environment --
        env_path!("database.path", "SKIPHOUND_DATABASE_PATH", self.database.path);
        env_str!("environment", "SKIPHOUND_ENVIRONMENT", self.environment);

        // -- Cache --
        env_parse!("cache.ttl_days", "SKIPHOUND_CACHE_TTL_DAYS", self.cache.ttl_days);
        env_bool!("cache.l1_enabled", "SKIPHOUND_CACHE_L1_ENABLED", self.cache.l1_enabled);

        // -- Guardrails --
        env_parse!(
            "guardrails.daily_budget_cents",
            "SKIPHOUND_DAILY_BUDGET_CENTS",
            self.guardrails.daily_budget_cents
        );
        env_parse!(
            "guardrails.breaker_failure_threshold",
            "SKIPHOUND_BREAKER_THRESHOLD",
            self.guardrails.breaker_failure_threshold
        );
        env_parse!(
            "guardrails.breaker_cooldown_secs",
            "SKIPHOUND_BREAKER_COOLDOWN_SECS",
            self.guardrails.breaker_cooldown_secs
        );
        env_parse!(
            "guardrails.rate_per_sec",
            "SKIPHOUND_RATE_PER_SEC",
            self.guardrails.rate_per_sec
        );
        env_parse!(
            "guardrails.daily_quota",
            "SKIPHOUND_DAILY_QUOTA",
            self.guardrails.daily_quota
        );

        // -- Enrichment --
        env_str!(
            "enrichment.primary_provider",
            "SKIPHOUND_PRIMARY_PROVIDER",
            self.enrichment.primary_provider
        );
        env_bool!(
            "enrichment.fallback_enabled",
            "SKIPHOUND_FALLBACK_ENABLED",
            self.enrichment.fallback_enabled
        );
        env_str!(
            "enrichment.fallback_provider",
            "SKIPHOUND_FALLBACK_PROVIDER",
            self.enrichment.fallback_provider
        );
        env_parse!(
            "enrichment.max_retries",
            "SKIPHOUND_MAX_RETRIES",
            self.enrichment.max_retries
        );
        env_parse!(
            "enrichment.retry_delay_ms",
            "SKIPHOUND_RETRY_DELAY_MS",
            self.enrichment.retry_delay_ms
        );

        // -- Batch --
        env_parse!(
            "batch.auto_pause_items",
            "SKIPHOUND_AUTO_PAUSE_ITEMS",
            self.batch.auto_pause_items
        );
        env_path!(
            "batch.artifact_dir",
            "SKIPHOUND_ARTIFACT_DIR",
            self.batch.artifact_dir
        );

        // -- Demo (both must be set for synthetic data) --
        env_bool!("demo.enabled", "SKIPHOUND_DEMO_ENABLED", self.demo.enabled);
        env_bool!(
            "demo.allow_synthetic",
            "SKIPHOUND_DEMO_ALLOW_SYNTHETIC",
            self.demo.allow_synthetic
        );

        // -- Logging --
        env_str!("logging.level", "SKIPHOUND_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "SKIPHOUND_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 7410);
        assert_eq!(config.cache.ttl_days, 7);
        assert!(config.cache.l1_enabled);
        assert_eq!(config.enrichment.max_retries, 2);
        assert_eq!(config.environment, "production");
        assert!(!config.demo_active());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            environment = "development"

            [enrichment]
            primary_provider = "directskip"
            fallback_enabled = true

            [providers.directskip]
            endpoint = "https://api.directskip.example/v2/lookup"
            api_key = "sk-test"
            cost_cents = 18
            "#,
        )
        .unwrap();

        assert_eq!(config.enrichment.primary_provider, "directskip");
        assert!(config.enrichment.fallback_enabled);
        let ds = config.providers.directskip.unwrap();
        assert_eq!(ds.cost_cents, 18);
        assert!(config.providers.batchdata.is_none());
    }

    #[test]
    fn test_demo_requires_both_flags_and_non_production() {
        let mut config = Config::default();
        config.demo.enabled = true;
        assert!(!config.demo_active());

        config.demo.allow_synthetic = true;
        // Still production.
        assert!(!config.demo_active());

        config.environment = "development".into();
        assert!(config.demo_active());
    }

    #[test]
    fn test_env_override_applies() {
        std::env::set_var("SKIPHOUND_CACHE_TTL_DAYS", "14");
        std::env::set_var("SKIPHOUND_CACHE_L1_ENABLED", "false");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.cache.ttl_days, 14);
        assert!(!config.cache.l1_enabled);
        assert!(config.env_overrides.is_overridden("cache.ttl_days"));
        assert_eq!(
            config.env_overrides.env_var_for("cache.l1_enabled"),
            Some("SKIPHOUND_CACHE_L1_ENABLED")
        );
        assert!(!config.env_overrides.is_overridden("server.host"));

        std::env::remove_var("SKIPHOUND_CACHE_TTL_DAYS");
        std::env::remove_var("SKIPHOUND_CACHE_L1_ENABLED");
    }

    #[test]
    fn test_listen_addr() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "127.0.0.1:7410");
    }
}
