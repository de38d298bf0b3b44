// In-memory fakes of the pipeline collaborators, shared by the job tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::config::Settings;
use common::db::repositories::{FileRecordStore, ReconciliationStore};
use common::errors::{DatabaseError, RemoteError, StorageError};
use common::models::{FileGroup, FileKind, FileRecord, FileStatus, SectionBatch, Stage};
use common::remote::RemoteFileSource;
use common::storage::ObjectStore;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

pub const ROOT: &str = "/data/acme";
pub const BILL_PATH: &str = "/data/acme/bill/daily/20240301.zip";
pub const TRADE_PATH: &str = "/data/acme/trade/detail/trade_20240301.csv";

/// Fixed layout: summary block, blank separator, detail block
pub const SECTIONED_CSV: &str = "\u{feff}商户号,结算日期,总笔数,总金额,手续费
M001,2024-03-01,2,300.50,1.20

交易流水号,交易时间,交易金额,税费,交易状态
T001,2024-03-01 10:00:00,100.25,0.5,成功
T002,2024-03-01 11:00:00,200.25,0.7,已退款
";

pub const TRADE_CSV: &str = "交易流水号,商户号,交易时间,交易金额,交易状态
T100,M001,2024-03-01 09:00:00,50.00,成功
T101,M001,2024-03-01 09:05:00,75.00,处理中
";

pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.remote.root_dir = ROOT.to_string();
    settings.stage_job.max_workers = 2;
    settings.stage_job.page_size = 1;
    settings.import_job.max_workers = 2;
    settings
}

pub fn target_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

pub fn zip_bytes(member: &str, content: &str) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        writer
            .start_file(member, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    buffer.into_inner()
}

// ============================================================================
// Remote
// ============================================================================

#[derive(Default)]
pub struct FakeRemote {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    pub reads: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote holding the default bill archive and trade file
    pub fn with_defaults() -> Self {
        let remote = Self::new();
        remote.put(BILL_PATH, zip_bytes("20240301.csv", SECTIONED_CSV));
        remote.put(TRADE_PATH, TRADE_CSV.as_bytes().to_vec());
        remote
    }

    pub fn put(&self, path: &str, content: Vec<u8>) {
        self.files.lock().unwrap().insert(path.to_string(), content);
    }

    pub fn fail_reads_of(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFileSource for FakeRemote {
    async fn list_folder(
        &self,
        folder_path: &str,
        _since: NaiveDate,
    ) -> Result<Vec<String>, RemoteError> {
        let prefix = format!("{}/", folder_path);
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn read_all(&self, remote_path: &str) -> Result<Vec<u8>, RemoteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(remote_path) {
            return Err(RemoteError::Transfer {
                path: remote_path.to_string(),
                exit_code: 1,
                stderr: "Permission denied".to_string(),
            });
        }
        self.files
            .lock()
            .unwrap()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| RemoteError::Transfer {
                path: remote_path.to_string(),
                exit_code: 1,
                stderr: "No such file or directory".to_string(),
            })
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, RemoteError> {
        let content = self.read_all(remote_path).await?;
        std::fs::write(local_path, &content).map_err(|e| RemoteError::LocalIo {
            path: local_path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(content.len() as u64)
    }

    async fn file_size(&self, remote_path: &str) -> Result<u64, RemoteError> {
        self.files
            .lock()
            .unwrap()
            .get(remote_path)
            .map(|content| content.len() as u64)
            .ok_or_else(|| RemoteError::RemoteStat {
                path: remote_path.to_string(),
                reason: "No such file or directory".to_string(),
            })
    }
}

// ============================================================================
// Object store
// ============================================================================

#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    tags: Mutex<HashMap<(String, String), String>>,
    failing_listing: Mutex<bool>,
    failing_uploads: Mutex<HashSet<String>>,
    pub uploads: AtomicUsize,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, content: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), content);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn tag(&self, key: &str, name: &str) -> Option<String> {
        self.tags
            .lock()
            .unwrap()
            .get(&(key.to_string(), name.to_string()))
            .cloned()
    }

    pub fn fail_listing(&self) {
        *self.failing_listing.lock().unwrap() = true;
    }

    pub fn fail_uploads_of(&self, key: &str) {
        self.failing_uploads.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_uploads.lock().unwrap().clear();
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn upload(&self, key: &str, body: &[u8], content_length: u64) -> Result<(), StorageError> {
        if body.len() as u64 != content_length {
            return Err(StorageError::ContentLength {
                key: key.to_string(),
                declared: content_length,
                actual: body.len() as u64,
            });
        }
        if self.failing_uploads.lock().unwrap().contains(key) {
            return Err(StorageError::MinioError(format!(
                "Put object '{}' returned HTTP 503",
                key
            )));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.put(key, body.to_vec());
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> BoxStream<'static, Result<String, StorageError>> {
        if *self.failing_listing.lock().unwrap() {
            return stream::iter(vec![Err(StorageError::MinioError(
                "connection refused".to_string(),
            ))])
            .boxed();
        }
        let keys: Vec<Result<String, StorageError>> = self
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .map(Ok)
            .collect();
        stream::iter(keys).boxed()
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn download_to(
        &self,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), StorageError> {
        let content = self.download(key).await?;
        writer
            .write_all(&content)
            .await
            .map_err(|e| StorageError::FileSystemError(e.to_string()))
    }

    async fn get_tag(&self, key: &str, name: &str) -> Result<Option<String>, StorageError> {
        if !self.contains(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(self.tag(key, name))
    }

    async fn set_tag(&self, key: &str, name: &str, value: &str) -> Result<(), StorageError> {
        if !self.contains(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.tags
            .lock()
            .unwrap()
            .insert((key.to_string(), name.to_string()), value.to_string());
        Ok(())
    }
}

// ============================================================================
// File records
// ============================================================================

#[derive(Default)]
pub struct FakeRecords {
    groups: Mutex<HashMap<Uuid, FileGroup>>,
    records: Mutex<HashMap<String, FileRecord>>,
}

impl FakeRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, file_name: &str) -> Option<FileRecord> {
        self.records.lock().unwrap().get(file_name).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn groups(&self) -> Vec<FileGroup> {
        self.groups.lock().unwrap().values().cloned().collect()
    }

    pub fn insert(&self, record: FileRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.file_name.clone(), record);
    }
}

#[async_trait]
impl FileRecordStore for FakeRecords {
    async fn create_group(&self, group: &FileGroup) -> Result<(), DatabaseError> {
        self.groups.lock().unwrap().insert(group.id, group.clone());
        Ok(())
    }

    async fn mark_group_imported(
        &self,
        group_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        if let Some(group) = self.groups.lock().unwrap().get_mut(&group_id) {
            group.imported_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn find_by_file_name(
        &self,
        file_name: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        Ok(self.record(file_name))
    }

    async fn create(&self, record: &FileRecord) -> Result<(), DatabaseError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.file_name) {
            return Err(DatabaseError::DuplicateKey(record.file_name.clone()));
        }
        records.insert(record.file_name.clone(), record.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        stage: Stage,
        status: FileStatus,
    ) -> Result<(), DatabaseError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .values_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        match stage {
            Stage::Download => record.download_status = status,
            Stage::Upload => record.upload_status = status,
            Stage::Import => record.import_status = status,
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn list_by_status(
        &self,
        stage: Stage,
        status: FileStatus,
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|record| {
                let current = match stage {
                    Stage::Download => record.download_status,
                    Stage::Upload => record.upload_status,
                    Stage::Import => record.import_status,
                };
                current == status
            })
            .cloned()
            .collect())
    }
}

// ============================================================================
// Reconciliation tables
// ============================================================================

#[derive(Default)]
pub struct FakeReconciliation {
    sections: Mutex<Vec<(Uuid, SectionBatch)>>,
    pub calls: AtomicUsize,
}

impl FakeReconciliation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch(&self, file_id: Uuid, kind: FileKind) -> Option<SectionBatch> {
        self.sections
            .lock()
            .unwrap()
            .iter()
            .find(|(id, batch)| *id == file_id && batch.kind() == kind)
            .map(|(_, batch)| batch.clone())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReconciliationStore for FakeReconciliation {
    async fn replace_section(
        &self,
        file_id: Uuid,
        batch: SectionBatch,
    ) -> Result<u64, DatabaseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let inserted = batch.len() as u64;
        let mut sections = self.sections.lock().unwrap();
        sections.retain(|(id, existing)| !(*id == file_id && existing.kind() == batch.kind()));
        sections.push((file_id, batch));
        Ok(inserted)
    }
}
