use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ferry_core::{
    load_config, validate_config, AcquisitionAgent, AgentBackend, ArtifactValidator, BlobStore,
    CommandAgent, Config, ContainerValidator, DatabaseBackend, Dispatcher, DispatcherConfig,
    FsBlobStore, HttpAgent, HttpBlobStore, InMemoryJobStore, JobStore, Orchestrator,
    OrchestratorConfig, SqliteJobStore, StorageBackend,
};
use ferry_server::{api::create_router, state::AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
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
    let config_path = std::env::var("FERRY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!(
        max_attempts = config.jobs.max_attempts,
        worker_pool_size = config.jobs.worker_pool_size,
        queue_capacity = config.jobs.queue_capacity,
        "Job limits"
    );

    let store = create_store(&config)?;
    let agent = create_agent(&config)?;
    info!("Using acquisition agent: {}", agent.name());
    let blob_store = create_blob_store(&config)?;
    info!("Using blob store: {}", blob_store.name());

    let validator: Arc<dyn ArtifactValidator> =
        Arc::new(ContainerValidator::new(config.validator.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::from(&config.jobs),
        Arc::clone(&store),
        agent,
        validator,
        blob_store,
    ));

    // Start dispatcher (recovers jobs left by a previous run)
    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig::from(&config.jobs),
        orchestrator,
    ));
    dispatcher.start().await;

    // Create app state and router
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        Arc::clone(&dispatcher),
    ));
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

    info!("Stopping dispatcher...");
    dispatcher.stop().await;
    info!("Server shut down");

    Ok(())
}

fn create_store(config: &Config) -> Result<Arc<dyn JobStore>> {
    let store: Arc<dyn JobStore> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Job store: sqlite at {:?}", config.database.path);
            Arc::new(
                SqliteJobStore::new(&config.database.path)
                    .context("Failed to create job store")?,
            )
        }
        DatabaseBackend::Memory => {
            info!("Job store: in-memory (jobs are lost on restart)");
            Arc::new(InMemoryJobStore::new())
        }
    };
    Ok(store)
}

fn create_agent(config: &Config) -> Result<Arc<dyn AcquisitionAgent>> {
    let agent: Arc<dyn AcquisitionAgent> = match config.agent.backend {
        AgentBackend::Command => Arc::new(CommandAgent::new(
            config.agent.command.clone(),
            config.jobs.work_dir.clone(),
        )),
        AgentBackend::Http => Arc::new(
            HttpAgent::new(&config.agent.http).context("Failed to create HTTP agent")?,
        ),
    };
    Ok(agent)
}

fn create_blob_store(config: &Config) -> Result<Arc<dyn BlobStore>> {
    let blob_store: Arc<dyn BlobStore> = match config.storage.backend {
        StorageBackend::Filesystem => Arc::new(FsBlobStore::new(&config.storage.filesystem)),
        StorageBackend::Http => {
            let http = config
                .storage
                .http
                .as_ref()
                .context("storage.backend is http but [storage.http] is missing")?;
            Arc::new(HttpBlobStore::new(http).context("Failed to create HTTP blob store")?)
        }
    };
    Ok(blob_store)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
    info!("Shutdown signal received");
}
