// Importer binary entry point: load every staged, not yet imported object into Postgres

use anyhow::Result;
use common::config::Settings;
use common::db::repositories::{FileRecordRepository, FileRecordStore, ReconciliationRepository};
use common::db::DbPool;
use common::jobs::ImportJob;
use common::models::{FileStatus, Stage};
use common::storage::MinioObjectStore;
use common::telemetry;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(provider_id = %settings.provider.provider_id, "Starting importer");

    let db_pool = DbPool::new(&settings.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        anyhow::anyhow!("Database initialization error: {}", e)
    })?;
    db_pool.health_check().await.map_err(|e| {
        error!(error = %e, "Database health check failed");
        anyhow::anyhow!("Database unreachable: {}", e)
    })?;

    let store = MinioObjectStore::new(&settings.minio).map_err(|e| {
        error!(error = %e, "Failed to initialize MinIO client");
        anyhow::anyhow!("MinIO initialization error: {}", e)
    })?;
    store.health_check().await.map_err(|e| {
        error!(error = %e, "MinIO health check failed");
        anyhow::anyhow!("MinIO unreachable: {}", e)
    })?;

    let records = Arc::new(FileRecordRepository::new(db_pool.clone()));
    match records.list_by_status(Stage::Import, FileStatus::Failed).await {
        Ok(failed) if !failed.is_empty() => {
            info!(count = failed.len(), "Retrying files whose previous import failed");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to count previously failed imports"),
    }

    let job = Arc::new(ImportJob::new(
        Arc::new(store),
        records,
        Arc::new(ReconciliationRepository::new(db_pool.clone())),
        &settings,
    ));

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let result = job.run(cancel).await;

    db_pool.close().await;
    telemetry::shutdown_tracer();

    let report = result.map_err(|e| {
        error!(error = %e, "Import run failed");
        anyhow::anyhow!("Import run failed: {}", e)
    })?;

    if report.failed() > 0 {
        warn!(
            failed = report.failed(),
            "Some files failed to import and will be retried on the next run"
        );
    }
    info!(
        dispatched = report.dispatched,
        succeeded = report.succeeded,
        skipped = report.skipped,
        "Importer finished"
    );

    Ok(())
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, cancelling run");
                cancel.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });
}
