// File record repository: one row per discovered file with per-stage status

use super::queries::file_record_queries;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{FileGroup, FileRecord, FileStatus, Stage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

/// Persistence of file groups and file records
///
/// Lookups are keyed by file name, the natural key that makes reruns
/// idempotent. Status updates are keyed by record id.
#[async_trait]
pub trait FileRecordStore: Send + Sync {
    async fn create_group(&self, group: &FileGroup) -> Result<(), DatabaseError>;

    /// Set `imported_at` unless it is already set
    async fn mark_group_imported(
        &self,
        group_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn find_by_file_name(&self, file_name: &str)
        -> Result<Option<FileRecord>, DatabaseError>;

    /// Insert a new record; a second record with the same file name fails
    /// with `DatabaseError::DuplicateKey`
    async fn create(&self, record: &FileRecord) -> Result<(), DatabaseError>;

    async fn update_status(
        &self,
        id: Uuid,
        stage: Stage,
        status: FileStatus,
    ) -> Result<(), DatabaseError>;

    async fn list_by_status(
        &self,
        stage: Stage,
        status: FileStatus,
    ) -> Result<Vec<FileRecord>, DatabaseError>;
}

/// Postgres-backed file record store
pub struct FileRecordRepository {
    pool: DbPool,
}

impl FileRecordRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileRecordStore for FileRecordRepository {
    #[instrument(skip(self, group), fields(group_id = %group.id, name = %group.name))]
    async fn create_group(&self, group: &FileGroup) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO file_groups (id, name, provider_id, target_date, imported_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(&group.provider_id)
        .bind(group.target_date)
        .bind(group.imported_at)
        .bind(group.created_at)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(group_id = %group.id, name = %group.name, "File group created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_group_imported(
        &self,
        group_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE file_groups SET imported_at = $2 WHERE id = $1 AND imported_at IS NULL",
        )
        .bind(group_id)
        .bind(at)
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_file_name(
        &self,
        file_name: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM file_records WHERE file_name = $1",
            file_record_queries::SELECT_ALL_COLUMNS
        );

        let record = sqlx::query_as::<_, FileRecord>(&query)
            .bind(file_name)
            .fetch_optional(self.pool.pool())
            .await?;

        Ok(record)
    }

    #[instrument(skip(self, record), fields(file_name = %record.file_name))]
    async fn create(&self, record: &FileRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO file_records (
                id, provider_id, group_id, file_name, folder, remote_path, storage_key,
                download_status, upload_status, import_status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(&record.provider_id)
        .bind(record.group_id)
        .bind(&record.file_name)
        .bind(&record.folder)
        .bind(&record.remote_path)
        .bind(&record.storage_key)
        .bind(record.download_status.to_string())
        .bind(record.upload_status.to_string())
        .bind(record.import_status.to_string())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(
            file_id = %record.id,
            file_name = %record.file_name,
            "File record created"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: Uuid,
        stage: Stage,
        status: FileStatus,
    ) -> Result<(), DatabaseError> {
        // Column names come from a closed enum, never from input
        let query = format!(
            "UPDATE file_records SET {} = $2, updated_at = NOW() WHERE id = $1",
            stage.column()
        );

        let result = sqlx::query(&query)
            .bind(id)
            .bind(status.to_string())
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "File record not found: {}",
                id
            )));
        }

        tracing::debug!(file_id = %id, stage = %stage, status = %status, "File status updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_by_status(
        &self,
        stage: Stage,
        status: FileStatus,
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM file_records WHERE {} = $1 ORDER BY created_at",
            file_record_queries::SELECT_ALL_COLUMNS,
            stage.column()
        );

        let records = sqlx::query_as::<_, FileRecord>(&query)
            .bind(status.to_string())
            .fetch_all(self.pool.pool())
            .await?;

        tracing::debug!(count = records.len(), stage = %stage, status = %status, "Listed file records");
        Ok(records)
    }
}
