use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediarelay_core::{
    load_config, validate_config, Engine, Fetcher, HttpFetcher, ItemStore, SqliteItemStore,
    StrategySet, TmdbEnricher,
};
use mediarelay_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("MEDIARELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("mediarelay {} configuration loaded", VERSION);
    info!("Database path: {:?}", config.database.path);
    info!("Staging directory: {:?}", config.engine.staging_dir);

    // Create SQLite item store
    let store: Arc<dyn ItemStore> = Arc::new(
        SqliteItemStore::new(&config.database.path).context("Failed to create item store")?,
    );
    info!("Item store initialized");

    // Create acquisition collaborator
    let fetcher: Arc<dyn Fetcher> =
        Arc::new(HttpFetcher::new(&config.acquisition).context("Failed to create HTTP fetcher")?);

    // Create engine
    let strategies = StrategySet::standard(&config.transfer);
    let mut engine = Engine::new(&config, store, fetcher, strategies);

    // Attach metadata enrichment if configured
    if let Some(tmdb_config) = &config.enrichment.tmdb {
        match TmdbEnricher::new(tmdb_config.clone()) {
            Ok(enricher) => {
                info!("TMDB enrichment enabled");
                engine = engine.with_enricher(Arc::new(enricher));
            }
            Err(e) => warn!("TMDB enrichment disabled: {}", e),
        }
    }

    for target in &config.targets {
        info!(
            "Target {}: {} at {} ({} slot(s), {}..={})",
            target.name,
            target.protocol,
            target.base_path,
            target.max_concurrent,
            target.min_quality,
            target.max_quality
        );
    }

    let engine = Arc::new(engine);
    engine.start().await;

    // Build router
    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, Arc::clone(&engine)));
    let app = create_router(state);

    // Start server
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down engine");
    engine.stop().await;
    info!("Server stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
