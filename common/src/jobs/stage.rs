// Stage job: copy newly discovered remote files into object storage

use super::with_cancel;
use crate::config::{ReportCategory, Settings};
use crate::db::repositories::FileRecordStore;
use crate::errors::{DatabaseError, PipelineError};
use crate::lock::FileLocks;
use crate::models::{
    file_name_of, FileGroup, FileRecord, FileStatus, RemoteFile, RemoteFileGroup, RunReport, Stage,
};
use crate::remote::{RemoteFileSource, RemoteLister};
use crate::storage::{key_from_remote_path, ObjectStore};
use crate::telemetry;
use crate::worker::{Outcome, WorkerPool};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Lists remote folders for a target date and stages every file not yet
/// uploaded
///
/// Per file: download, then upload, each recorded as its own status. A file
/// whose upload already succeeded is skipped, so reruns only retry what
/// failed or never ran.
pub struct StageJob {
    remote: Arc<dyn RemoteFileSource>,
    store: Arc<dyn ObjectStore>,
    records: Arc<dyn FileRecordStore>,
    locks: FileLocks,
    provider_id: String,
    root_dir: String,
    categories: Vec<ReportCategory>,
    page_size: usize,
    max_workers: usize,
}

impl StageJob {
    pub fn new(
        remote: Arc<dyn RemoteFileSource>,
        store: Arc<dyn ObjectStore>,
        records: Arc<dyn FileRecordStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            remote,
            store,
            records,
            locks: FileLocks::global().clone(),
            provider_id: settings.provider.provider_id.clone(),
            root_dir: settings.remote.root_dir.clone(),
            categories: settings.provider.categories.clone(),
            page_size: settings.stage_job.page_size,
            max_workers: settings.stage_job.max_workers,
        }
    }

    /// Use a private lock map instead of the process-wide one
    pub fn with_locks(mut self, locks: FileLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Stage every file modified on or after `target_date`
    ///
    /// Only failing to create the run's file group is fatal; per-file
    /// failures are recorded on the file and counted in the report.
    #[instrument(skip(self, cancel), fields(provider_id = %self.provider_id))]
    pub async fn run(
        self: Arc<Self>,
        target_date: NaiveDate,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();

        let group = FileGroup::new(self.provider_id.clone(), target_date);
        self.records.create_group(&group).await.map_err(|e| {
            error!(error = %e, group = %group.name, "Failed to create file group");
            PipelineError::GroupCreation(e.to_string())
        })?;

        info!(group = %group.name, target_date = %target_date, "Stage run started");

        let lister = RemoteLister::new(
            Arc::clone(&self.remote),
            self.root_dir.clone(),
            self.categories.clone(),
            self.page_size,
        );
        let (groups, lister_handle) = lister.spawn(target_date, cancel.clone());

        let pool = WorkerPool::new("stage", self.max_workers);
        let (file_tx, file_rx) = mpsc::channel(pool.max_workers());
        let flatten_handle = tokio::spawn(flatten_groups(groups, file_tx));

        let job = Arc::clone(&self);
        let group_id = group.id;
        let report = pool
            .run(file_rx, cancel.clone(), move |file, cancel| {
                let job = Arc::clone(&job);
                async move { job.stage_file(file, group_id, cancel).await }
            })
            .await;

        if let Err(e) = flatten_handle.await {
            error!(error = %e, "File dispatcher task failed");
        }
        if let Err(e) = lister_handle.await {
            error!(error = %e, "Remote lister task failed");
        }

        telemetry::record_run_duration("stage", started.elapsed().as_secs_f64());

        if cancel.is_cancelled() {
            warn!(group = %group.name, "Stage run cancelled");
        }
        info!(
            group = %group.name,
            dispatched = report.dispatched,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Stage run finished"
        );

        Ok(report)
    }

    #[instrument(skip(self, file, cancel), fields(remote_path = %file.remote_path))]
    async fn stage_file(
        &self,
        file: RemoteFile,
        group_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<Outcome, PipelineError> {
        let file_name = file_name_of(&file.remote_path).to_string();
        let _guard = with_cancel(&cancel, async {
            Ok::<_, PipelineError>(self.locks.acquire(&file_name).await)
        })
        .await?;

        let record = self.find_or_create(&file, &file_name, group_id, &cancel).await?;
        if record.upload_status == FileStatus::Success {
            debug!(file_name = %file_name, "Already staged, skipping");
            return Ok(Outcome::Skipped);
        }

        let content = match with_cancel(&cancel, self.remote.read_all(&file.remote_path)).await {
            Ok(content) => content,
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                error!(file_name = %file_name, stage = %Stage::Download, error = %e, "Download failed");
                self.mark_failed(&record, Stage::Download).await;
                return Err(e);
            }
        };
        self.records
            .update_status(record.id, Stage::Download, FileStatus::Success)
            .await?;

        let length = content.len() as u64;
        match with_cancel(
            &cancel,
            self.store.upload(&record.storage_key, &content, length),
        )
        .await
        {
            Ok(()) => {}
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                error!(
                    file_name = %file_name,
                    key = %record.storage_key,
                    stage = %Stage::Upload,
                    error = %e,
                    "Upload failed"
                );
                self.mark_failed(&record, Stage::Upload).await;
                return Err(e);
            }
        }
        self.records
            .update_status(record.id, Stage::Upload, FileStatus::Success)
            .await?;

        telemetry::record_file_staged();
        info!(
            file_name = %file_name,
            key = %record.storage_key,
            bytes = length,
            "File staged"
        );

        Ok(Outcome::Done)
    }

    /// Existing record for the file, or a new all-pending one
    async fn find_or_create(
        &self,
        file: &RemoteFile,
        file_name: &str,
        group_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<FileRecord, PipelineError> {
        if let Some(record) = with_cancel(cancel, self.records.find_by_file_name(file_name)).await? {
            return Ok(record);
        }

        let record = FileRecord::new_pending(
            self.provider_id.clone(),
            Some(group_id),
            file.category.clone(),
            file.remote_path.clone(),
            key_from_remote_path(&file.remote_path, &self.root_dir),
        );

        match self.records.create(&record).await {
            Ok(()) => Ok(record),
            Err(DatabaseError::DuplicateKey(_)) => {
                // Another process inserted it first
                debug!(file_name = %file_name, "Record created concurrently, reloading");
                self.records
                    .find_by_file_name(file_name)
                    .await?
                    .ok_or_else(|| {
                        DatabaseError::NotFound(format!("File record vanished: {}", file_name))
                            .into()
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_failed(&self, record: &FileRecord, stage: Stage) {
        telemetry::record_stage_failure(stage);
        if let Err(e) = self
            .records
            .update_status(record.id, stage, FileStatus::Failed)
            .await
        {
            error!(
                file_name = %record.file_name,
                stage = %stage,
                error = %e,
                "Failed to record stage failure"
            );
        }
    }
}

/// Split listed pages into single files for the worker pool
async fn flatten_groups(
    mut groups: mpsc::Receiver<RemoteFileGroup>,
    files: mpsc::Sender<RemoteFile>,
) {
    while let Some(group) = groups.recv().await {
        telemetry::record_files_discovered(group.paths.len());
        debug!(folder = %group.folder, count = group.paths.len(), "Dispatching page");

        for remote_path in group.paths {
            let file = RemoteFile {
                category: group.category.clone(),
                remote_path,
            };
            if files.send(file).await.is_err() {
                // Pool stopped pulling; dropping `groups` stops the lister
                return;
            }
        }
    }
}
