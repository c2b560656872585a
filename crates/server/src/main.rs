use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fileflip_core::{
    load_config, validate_config, AdmissionController, Config, FailoverJobStore, JobStore,
    SqliteJobStore, WorkerPool,
};

use fileflip_server::api::create_router;
use fileflip_server::state::AppState;

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
    let config_path = std::env::var("FILEFLIP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration; a missing file means defaults + env overrides only
    let config = if config_path.exists() {
        info!("Loading configuration from {:?}", config_path);
        load_config(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        info!(
            "No config file at {:?}, using built-in defaults",
            config_path
        );
        Config::default()
    };

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    // Config hash for correlating deploys in logs
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded"
    );

    // Storage directories
    for dir in [
        &config.storage.upload_dir,
        &config.storage.results_dir,
        &config.storage.work_dir,
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create storage directory {:?}", dir))?;
    }

    // Job store: durable SQLite behind the failover wrapper. If the database
    // cannot even be opened, start degraded on the in-memory queue rather
    // than refusing all requests.
    let store = match SqliteJobStore::new(&config.database.path) {
        Ok(durable) => {
            info!("Job store initialized at {:?}", config.database.path);
            Arc::new(FailoverJobStore::new(Box::new(durable)))
        }
        Err(e) => {
            warn!(
                "Durable job store unavailable ({}), starting degraded on the in-memory queue",
                e
            );
            Arc::new(FailoverJobStore::degraded_from_start())
        }
    };

    // Admission controller
    let admission = AdmissionController::new(config.admission.clone());
    info!(
        anonymous_quota = config.admission.anonymous_quota,
        registered_quota = config.admission.registered_quota,
        global_per_minute = config.admission.global_per_minute,
        "Admission controller initialized"
    );

    // Worker pool
    let pool = Arc::new(WorkerPool::new(
        config.workers.clone(),
        config.tools.clone(),
        Arc::clone(&store) as Arc<dyn JobStore>,
        config.storage.work_dir.clone(),
        config.storage.results_dir.clone(),
    ));
    pool.start();
    info!("Worker pool started");

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&store),
        admission,
        Arc::clone(&pool),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop workers, then release the store
    info!("Server shutting down...");
    pool.stop().await;
    info!("Worker pool stopped");
    store.close();

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
