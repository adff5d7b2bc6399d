//! folio-api - HTTP API server for folio source materials

use std::sync::Arc;

use tracing::{info, warn};

use folio_api::config::{LogConfig, ServerConfig};
use folio_api::{router, select_dispatcher, telemetry, AppState, MaterialService};
use folio_db::{Database, FilesystemBackend, PoolConfig};
use folio_jobs::{ExtractionPipeline, ExtractorRegistry, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_config = LogConfig::from_env();
    let _file_guard = telemetry::init_tracing(&log_config);
    info!(
        log_format = ?log_config.format,
        log_file = log_config.file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = ServerConfig::from_env();

    info!("Connecting to database...");
    let db = Database::connect_with_config(&config.database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    let ledger = Arc::new(db.materials.clone());
    let storage = Arc::new(FilesystemBackend::new(&config.file_storage_path));
    info!("File storage initialized at {}", config.file_storage_path);

    let registry = Arc::new(ExtractorRegistry::with_defaults());
    info!(formats = ?registry.available_formats(), "Extractors registered");
    let pipeline = ExtractionPipeline::new(ledger.clone(), storage.clone(), registry);

    let setup = select_dispatcher(
        &config,
        WorkerConfig::from_env(),
        Arc::new(db.jobs.clone()),
        Some(db.jobs.job_notify()),
        pipeline,
    )
    .await;

    let service = MaterialService::new(
        ledger,
        storage,
        Arc::new(db.projects.clone()),
        Arc::new(db.starred.clone()),
        setup.dispatcher,
    )
    .with_max_upload_bytes(config.max_upload_bytes);

    let app = router(AppState { service }, &config);

    let addr = config.bind_addr()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    if let Some(worker) = setup.worker {
        info!("Stopping job worker...");
        worker.shutdown().await?;
    }
    info!("Server stopped");
    Ok(())
}
