// Import job: parse staged objects and load their sections into Postgres

use super::with_cancel;
use crate::config::{ReportCategory, SectionLayout, Settings};
use crate::db::repositories::{FileRecordStore, ReconciliationStore};
use crate::errors::{PipelineError, StorageError};
use crate::loader::build_batch;
use crate::lock::FileLocks;
use crate::models::{file_name_of, FileKind, FileRecord, FileStatus, RunReport, Stage};
use crate::parser::{
    extract_text, normalize_headers, parse_flat, parse_sections, validate_headers, Section,
};
use crate::remote::join_remote;
use crate::storage::{key_from_remote_path, ObjectStore, IMPORT_STATUS_TAG};
use crate::telemetry;
use crate::worker::{Outcome, WorkerPool};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Reason label for sections with no data rows
const SKIP_EMPTY: &str = "empty";
/// Reason label for sections missing a required header
const SKIP_MISSING_HEADERS: &str = "missing_headers";

/// A configured category and the key prefix its staged objects live under
#[derive(Debug, Clone)]
struct CategoryRoute {
    prefix: String,
    category: ReportCategory,
}

/// Keys listed before the listing stopped, and the error that stopped it
type ListingResult = Result<usize, (usize, StorageError)>;

/// Walks the bucket and imports every staged object whose file record is
/// uploaded but not yet imported
pub struct ImportJob {
    store: Arc<dyn ObjectStore>,
    records: Arc<dyn FileRecordStore>,
    reconciliation: Arc<dyn ReconciliationStore>,
    locks: FileLocks,
    routes: Vec<CategoryRoute>,
    max_workers: usize,
}

impl ImportJob {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        records: Arc<dyn FileRecordStore>,
        reconciliation: Arc<dyn ReconciliationStore>,
        settings: &Settings,
    ) -> Self {
        let root = &settings.remote.root_dir;
        let routes = settings
            .provider
            .categories
            .iter()
            .map(|category| CategoryRoute {
                prefix: format!(
                    "{}/",
                    key_from_remote_path(&join_remote(root, &category.sub_path), root)
                ),
                category: category.clone(),
            })
            .collect();

        Self {
            store,
            records,
            reconciliation,
            locks: FileLocks::global().clone(),
            routes,
            max_workers: settings.import_job.max_workers,
        }
    }

    pub fn with_locks(mut self, locks: FileLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Category of an eligible key: under a configured prefix and with an
    /// accepted extension
    fn route(&self, key: &str) -> Option<&ReportCategory> {
        self.routes
            .iter()
            .find(|route| key.starts_with(&route.prefix) && route.category.accepts_extension(key))
            .map(|route| &route.category)
    }

    /// Import every eligible object in the bucket
    ///
    /// A listing that fails before producing any key ends the run with
    /// `PipelineError::Listing`; any other failure stays with its file.
    #[instrument(skip(self, cancel))]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        info!(categories = self.routes.len(), "Import run started");

        let pool = WorkerPool::new("import", self.max_workers);
        let (key_tx, key_rx) = mpsc::channel(pool.max_workers() * 2);
        let listing = self.spawn_listing(key_tx, cancel.clone());

        let job = Arc::clone(&self);
        let report = pool
            .run(key_rx, cancel.clone(), move |key: String, cancel| {
                let job = Arc::clone(&job);
                async move { job.import_key(key, cancel).await }
            })
            .await;

        telemetry::record_run_duration("import", started.elapsed().as_secs_f64());

        match listing.await {
            Ok(Ok(listed)) => debug!(listed = listed, "Object listing complete"),
            Ok(Err((0, e))) => {
                error!(error = %e, "Object listing failed");
                return Err(PipelineError::Listing(e.to_string()));
            }
            Ok(Err((listed, e))) => {
                warn!(listed = listed, error = %e, "Object listing stopped early");
            }
            Err(e) => error!(error = %e, "Object listing task failed"),
        }

        if cancel.is_cancelled() {
            warn!("Import run cancelled");
        }
        info!(
            dispatched = report.dispatched,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Import run finished"
        );

        Ok(report)
    }

    fn spawn_listing(
        self: &Arc<Self>,
        keys: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> JoinHandle<ListingResult> {
        let job = Arc::clone(self);
        tokio::spawn(async move {
            let mut stream = job.store.list_keys("");
            let mut listed = 0;

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => next,
                };

                match next {
                    None => break,
                    Some(Err(e)) => return Err((listed, e)),
                    Some(Ok(key)) => {
                        listed += 1;
                        if job.route(&key).is_none() {
                            debug!(key = %key, "Key not eligible for import");
                            continue;
                        }
                        if keys.send(key).await.is_err() {
                            break;
                        }
                    }
                }
            }

            Ok(listed)
        })
    }

    #[instrument(skip(self, cancel))]
    async fn import_key(&self, key: String, cancel: CancellationToken) -> Result<Outcome, PipelineError> {
        let Some(category) = self.route(&key) else {
            return Ok(Outcome::Skipped);
        };
        let file_name = file_name_of(&key).to_string();

        let _guard = with_cancel(&cancel, async {
            Ok::<_, PipelineError>(self.locks.acquire(&file_name).await)
        })
        .await?;

        let record = match with_cancel(&cancel, self.records.find_by_file_name(&file_name)).await? {
            None => {
                debug!(key = %key, "No file record, skipping");
                return Ok(Outcome::Skipped);
            }
            Some(record) if record.import_status == FileStatus::Success => {
                debug!(key = %key, "Already imported, skipping");
                return Ok(Outcome::Skipped);
            }
            Some(record) if record.upload_status != FileStatus::Success => {
                debug!(key = %key, upload_status = %record.upload_status, "Not staged yet, skipping");
                return Ok(Outcome::Skipped);
            }
            Some(record) => record,
        };

        match self.load_file(&record, &key, category, &cancel).await {
            Ok(sections) => {
                self.mark_import(&record, &key, FileStatus::Success).await?;
                if let Some(group_id) = record.group_id {
                    if let Err(e) = self.records.mark_group_imported(group_id, Utc::now()).await {
                        warn!(group_id = %group_id, error = %e, "Failed to mark group imported");
                    }
                }
                telemetry::record_file_imported();
                info!(file_name = %file_name, key = %key, sections = sections, "File imported");
                Ok(Outcome::Done)
            }
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                error!(file_name = %file_name, key = %key, stage = %Stage::Import, error = %e, "Import failed");
                telemetry::record_import_failure();
                if let Err(mark_err) = self.mark_import(&record, &key, FileStatus::Failed).await {
                    error!(file_name = %file_name, error = %mark_err, "Failed to record import failure");
                }
                let reason = match e {
                    PipelineError::ImportFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                Err(PipelineError::ImportFailed { file_name, reason })
            }
        }
    }

    /// Download, parse and load one object; returns the number of sections loaded
    async fn load_file(
        &self,
        record: &FileRecord,
        key: &str,
        category: &ReportCategory,
        cancel: &CancellationToken,
    ) -> Result<usize, PipelineError> {
        let content = with_cancel(cancel, self.store.download(key)).await?;
        let text = extract_text(&record.file_name, &content)?;

        let sections: Vec<(FileKind, Option<Section>)> = match category.layout {
            SectionLayout::Sectioned => {
                let parsed = parse_sections(&text)?;
                vec![
                    (FileKind::Summary, parsed.summary),
                    (FileKind::Detail, parsed.detail),
                ]
            }
            SectionLayout::Transactions => vec![(FileKind::Transaction, parse_flat(&text)?)],
        };

        let mut loaded = 0;
        for (kind, section) in sections {
            if self.load_section(record, kind, section, cancel).await? {
                loaded += 1;
            }
        }

        if loaded == 0 {
            return Err(PipelineError::ImportFailed {
                file_name: record.file_name.clone(),
                reason: "no section passed validation".to_string(),
            });
        }

        Ok(loaded)
    }

    /// Load one section; `Ok(false)` when it was skipped as empty or invalid
    async fn load_section(
        &self,
        record: &FileRecord,
        kind: FileKind,
        section: Option<Section>,
        cancel: &CancellationToken,
    ) -> Result<bool, PipelineError> {
        let section = match section {
            Some(section) if !section.records.is_empty() => section,
            _ => {
                info!(file_name = %record.file_name, kind = %kind, "Section has no rows, skipping");
                telemetry::record_section_skipped(kind, SKIP_EMPTY);
                return Ok(false);
            }
        };

        let headers = normalize_headers(&section.headers);
        let (valid, expected) = validate_headers(&headers, kind);
        if !valid {
            warn!(
                file_name = %record.file_name,
                kind = %kind,
                expected = ?expected,
                actual = ?headers,
                "Section is missing required headers, skipping"
            );
            telemetry::record_section_skipped(kind, SKIP_MISSING_HEADERS);
            return Ok(false);
        }

        let rows = Section {
            headers,
            records: section.records,
        }
        .to_row_maps();
        let batch = build_batch(kind, record.id, &rows)?;

        let inserted = with_cancel(cancel, self.reconciliation.replace_section(record.id, batch)).await?;
        telemetry::record_rows_inserted(kind, inserted);
        debug!(file_name = %record.file_name, kind = %kind, rows = inserted, "Section loaded");

        Ok(true)
    }

    /// Write the import status to the file record, then tag the object
    ///
    /// The two writes are independent; a tagging failure is only logged.
    async fn mark_import(
        &self,
        record: &FileRecord,
        key: &str,
        status: FileStatus,
    ) -> Result<(), PipelineError> {
        self.records
            .update_status(record.id, Stage::Import, status)
            .await?;

        if let Err(e) = self
            .store
            .set_tag(key, IMPORT_STATUS_TAG, &status.to_string())
            .await
        {
            warn!(key = %key, error = %e, "Failed to tag object with import status");
        }

        Ok(())
    }
}
