//! Skiphound -- contact-enrichment (skip-trace) orchestration service.
//!
//! This is the application entry point. It wires together all modules:
//!   - Configuration loading
//!   - Database initialization
//!   - Guardrail bootstrap (budget seeded from the call ledger)
//!   - Provider registry construction
//!   - Audit logger
//!   - HTTP server with graceful shutdown on SIGTERM / SIGINT

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use skiphound::api;
use skiphound::cache::TraceCache;
use skiphound::config::Config;
use skiphound::db::Database;
use skiphound::dnc::DncClient;
use skiphound::enrich::Orchestrator;
use skiphound::guardrails::GuardrailSet;
use skiphound::providers::client::HttpClient;
use skiphound::providers::ProviderRegistry;
use skiphound::store::audit::spawn_audit_logger;
use skiphound::AppState;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: PathBuf,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("skiphound.toml");

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("skiphound {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    CliArgs { config_path }
}

fn print_usage() {
    println!(
        "\
skiphound {version} -- skip-trace orchestration service

USAGE:
    skiphound [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: skiphound.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    SKIPHOUND_CONFIG       Alternative to --config flag
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse CLI arguments (SKIPHOUND_CONFIG env var as alternative).
    let cli = parse_args();
    let config_path = std::env::var("SKIPHOUND_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    // 2. Load configuration.
    let config = Config::load(&config_path)?;

    // 3. Initialize tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        environment = %config.environment,
        "Starting skiphound"
    );
    if config.demo_active() {
        tracing::warn!("Synthetic demo data is ACTIVE; no real providers will be consulted");
    }

    // 4. Open the database.
    let db = Database::open(&config.database.path)?;
    tracing::info!(path = %config.database.path.display(), "Database ready");

    // 5. Guardrails (budget seeded from the provider-call ledger).
    let guardrails = Arc::new(GuardrailSet::bootstrap(db.clone(), &config.guardrails)?);

    // 6. Provider registry + two-tier cache.
    let http = HttpClient::new();
    let registry = Arc::new(ProviderRegistry::from_config(&config, &http)?);
    tracing::info!(providers = ?registry.ids(), "Provider registry built");

    let cache = Arc::new(TraceCache::new(
        db.clone(),
        config.cache.ttl_days,
        config.cache.l1_enabled,
    ));

    // 7. Audit logger.
    let (audit_tx, audit_rx) = tokio::sync::mpsc::unbounded_channel();
    let audit_handle = spawn_audit_logger(db.clone(), audit_rx);

    // 8. Orchestrator + shared state.
    let dnc = DncClient::new(config.dnc.endpoint.clone(), http.clone());
    let config = Arc::new(config);
    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        Arc::clone(&cache),
        Arc::clone(&guardrails),
        Arc::clone(&registry),
        dnc,
        &config,
        audit_tx,
    ));

    let state = AppState::new(
        Arc::clone(&config),
        db,
        orchestrator,
        guardrails,
        registry,
        cache,
    );

    // 9. Router with shared layers.
    let cors = if config.server.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };

    let app = api::build_router(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors);

    // 10. Serve until SIGINT/SIGTERM.
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the audit logger flush its buffer before exit.
    audit_handle.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
