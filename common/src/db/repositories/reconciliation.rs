// Reconciliation repository: bulk inserts of typed section rows

use super::queries::section_queries;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{DetailRecord, FileKind, SectionBatch, SummaryRecord, TransactionRecord};
use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::instrument;
use uuid::Uuid;

/// Rows per INSERT statement, well under the Postgres bind parameter limit
const INSERT_CHUNK_ROWS: usize = 1000;

/// Destination for the typed rows of a parsed file
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Replace every row of this section's kind for `file_id` with `batch`
    ///
    /// The delete and all inserts share one transaction, so a re-import
    /// never duplicates rows and a failed insert leaves the previous rows.
    async fn replace_section(
        &self,
        file_id: Uuid,
        batch: SectionBatch,
    ) -> Result<u64, DatabaseError>;
}

pub struct ReconciliationRepository {
    pool: DbPool,
}

impl ReconciliationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert_summaries(
        tx: &mut Transaction<'_, Postgres>,
        rows: &[SummaryRecord],
    ) -> Result<u64, DatabaseError> {
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                FileKind::Summary.table(),
                section_queries::SUMMARY_COLUMNS
            ));
            builder.push_values(chunk, |mut b, r| {
                b.push_bind(r.file_id)
                    .push_bind(r.merchant_id.clone())
                    .push_bind(r.merchant_name.clone())
                    .push_bind(r.settle_date)
                    .push_bind(r.total_count)
                    .push_bind(r.total_amount)
                    .push_bind(r.refund_count)
                    .push_bind(r.refund_amount)
                    .push_bind(r.fee_amount)
                    .push_bind(r.net_amount)
                    .push_bind(r.currency.clone());
            });
            inserted += builder.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_details(
        tx: &mut Transaction<'_, Postgres>,
        rows: &[DetailRecord],
    ) -> Result<u64, DatabaseError> {
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                FileKind::Detail.table(),
                section_queries::DETAIL_COLUMNS
            ));
            builder.push_values(chunk, |mut b, r| {
                b.push_bind(r.file_id)
                    .push_bind(r.transaction_id.clone())
                    .push_bind(r.merchant_order_no.clone())
                    .push_bind(r.transaction_time)
                    .push_bind(r.transaction_type.clone())
                    .push_bind(r.transaction_amount)
                    .push_bind(r.fee_amount)
                    .push_bind(r.tax)
                    .push_bind(r.net_amount)
                    .push_bind(r.status.map(|s| s.to_string()))
                    .push_bind(r.currency.clone())
                    .push_bind(r.remark.clone());
            });
            inserted += builder.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_transactions(
        tx: &mut Transaction<'_, Postgres>,
        rows: &[TransactionRecord],
    ) -> Result<u64, DatabaseError> {
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                FileKind::Transaction.table(),
                section_queries::TRANSACTION_COLUMNS
            ));
            builder.push_values(chunk, |mut b, r| {
                b.push_bind(r.file_id)
                    .push_bind(r.transaction_id.clone())
                    .push_bind(r.merchant_id.clone())
                    .push_bind(r.merchant_order_no.clone())
                    .push_bind(r.transaction_time)
                    .push_bind(r.transaction_amount)
                    .push_bind(r.status.map(|s| s.to_string()))
                    .push_bind(r.channel.clone())
                    .push_bind(r.payer_account.clone())
                    .push_bind(r.currency.clone());
            });
            inserted += builder.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(inserted)
    }
}

#[async_trait]
impl ReconciliationStore for ReconciliationRepository {
    #[instrument(skip(self, batch), fields(kind = %batch.kind(), rows = batch.len()))]
    async fn replace_section(
        &self,
        file_id: Uuid,
        batch: SectionBatch,
    ) -> Result<u64, DatabaseError> {
        let kind = batch.kind();

        let mut tx = self.pool.pool().begin().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to begin transaction");
            DatabaseError::TransactionFailed(e.to_string())
        })?;

        let deleted = sqlx::query(&format!("DELETE FROM {} WHERE file_id = $1", kind.table()))
            .bind(file_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let inserted = match &batch {
            SectionBatch::Summary(rows) => Self::insert_summaries(&mut tx, rows).await?,
            SectionBatch::Detail(rows) => Self::insert_details(&mut tx, rows).await?,
            SectionBatch::Transaction(rows) => Self::insert_transactions(&mut tx, rows).await?,
        };

        tx.commit().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to commit section rows");
            DatabaseError::TransactionFailed(e.to_string())
        })?;

        tracing::info!(
            file_id = %file_id,
            kind = %kind,
            deleted = deleted,
            inserted = inserted,
            "Section rows replaced"
        );

        Ok(inserted)
    }
}
