// Stager binary entry point: stage one target date of remote files into MinIO

use anyhow::Result;
use chrono::{Days, NaiveDate, Utc};
use chrono_tz::Tz;
use common::config::Settings;
use common::db::repositories::FileRecordRepository;
use common::db::DbPool;
use common::jobs::StageJob;
use common::remote::SshRemoteSource;
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

    info!(provider_id = %settings.provider.provider_id, "Starting stager");

    let target_date = resolve_target_date(&settings)?;

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

    let job = Arc::new(StageJob::new(
        Arc::new(SshRemoteSource::new(settings.remote.clone())),
        Arc::new(store),
        Arc::new(FileRecordRepository::new(db_pool.clone())),
        &settings,
    ));

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let result = job.run(target_date, cancel).await;

    db_pool.close().await;
    telemetry::shutdown_tracer();

    let report = result.map_err(|e| {
        error!(error = %e, "Stage run failed");
        anyhow::anyhow!("Stage run failed: {}", e)
    })?;

    if report.failed() > 0 {
        warn!(
            failed = report.failed(),
            "Some files failed to stage and will be retried on the next run"
        );
    }
    info!(
        target_date = %target_date,
        dispatched = report.dispatched,
        succeeded = report.succeeded,
        skipped = report.skipped,
        "Stager finished"
    );

    Ok(())
}

/// Configured date, or today in the provider's timezone minus the lookback
fn resolve_target_date(settings: &Settings) -> Result<NaiveDate> {
    if let Some(date) = settings.stage_job.target_date {
        return Ok(date);
    }

    let tz: Tz = settings
        .provider
        .timezone
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid provider timezone: {}", e))?;
    let today = Utc::now().with_timezone(&tz).date_naive();

    today
        .checked_sub_days(Days::new(u64::from(settings.stage_job.lookback_days)))
        .ok_or_else(|| anyhow::anyhow!("Target date out of range"))
}

/// Cancel the run on Ctrl+C; in-flight files finish or stop at their next await
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
