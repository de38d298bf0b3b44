// Conversion of header-mapped rows into typed section records

pub mod coerce;

use crate::errors::CoercionError;
use crate::models::{DetailRecord, FileKind, SectionBatch, SummaryRecord, TransactionRecord};
use crate::parser::RowMap;
use coerce::{amount, count, date, text, timestamp, transaction_status};
use uuid::Uuid;

pub use coerce::{policy_for, FieldPolicy};

fn summary_record(file_id: Uuid, row: &RowMap) -> Result<SummaryRecord, CoercionError> {
    let kind = FileKind::Summary;
    Ok(SummaryRecord {
        file_id,
        merchant_id: text(row, "merchant_id"),
        merchant_name: text(row, "merchant_name"),
        settle_date: date(row, kind, "settle_date")?,
        total_count: count(row, kind, "total_count")?,
        total_amount: amount(row, kind, "total_amount")?,
        refund_count: count(row, kind, "refund_count")?,
        refund_amount: amount(row, kind, "refund_amount")?,
        fee_amount: amount(row, kind, "fee_amount")?,
        net_amount: amount(row, kind, "net_amount")?,
        currency: text(row, "currency"),
    })
}

fn detail_record(file_id: Uuid, row: &RowMap) -> Result<DetailRecord, CoercionError> {
    let kind = FileKind::Detail;
    Ok(DetailRecord {
        file_id,
        transaction_id: text(row, "transaction_id"),
        merchant_order_no: text(row, "merchant_order_no"),
        transaction_time: timestamp(row, kind, "transaction_time")?,
        transaction_type: text(row, "transaction_type"),
        transaction_amount: amount(row, kind, "transaction_amount")?,
        fee_amount: amount(row, kind, "fee_amount")?,
        tax: amount(row, kind, "tax")?,
        net_amount: amount(row, kind, "net_amount")?,
        status: transaction_status(row),
        currency: text(row, "currency"),
        remark: text(row, "remark"),
    })
}

fn transaction_record(file_id: Uuid, row: &RowMap) -> Result<TransactionRecord, CoercionError> {
    let kind = FileKind::Transaction;
    Ok(TransactionRecord {
        file_id,
        transaction_id: text(row, "transaction_id"),
        merchant_id: text(row, "merchant_id"),
        merchant_order_no: text(row, "merchant_order_no"),
        transaction_time: timestamp(row, kind, "transaction_time")?,
        transaction_amount: amount(row, kind, "transaction_amount")?,
        status: transaction_status(row),
        channel: text(row, "channel"),
        payer_account: text(row, "payer_account"),
        currency: text(row, "currency"),
    })
}

/// Typed records for every row of one section
///
/// A single row failing a hard-fail field rejects the whole batch.
pub fn build_batch(
    kind: FileKind,
    file_id: Uuid,
    rows: &[RowMap],
) -> Result<SectionBatch, CoercionError> {
    Ok(match kind {
        FileKind::Summary => SectionBatch::Summary(
            rows.iter()
                .map(|row| summary_record(file_id, row))
                .collect::<Result<_, _>>()?,
        ),
        FileKind::Detail => SectionBatch::Detail(
            rows.iter()
                .map(|row| detail_record(file_id, row))
                .collect::<Result<_, _>>()?,
        ),
        FileKind::Transaction => SectionBatch::Transaction(
            rows.iter()
                .map(|row| transaction_record(file_id, row))
                .collect::<Result<_, _>>()?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionStatus;

    fn row(pairs: &[(&str, &str)]) -> RowMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_summary_batch() {
        let file_id = Uuid::new_v4();
        let rows = vec![row(&[
            ("merchant_id", "M001"),
            ("settle_date", "2024-03-01"),
            ("total_count", "3"),
            ("total_amount", "300.50"),
            ("refund_amount", "bad"),
        ])];

        let batch = build_batch(FileKind::Summary, file_id, &rows).unwrap();
        let SectionBatch::Summary(records) = batch else {
            panic!("expected summary batch");
        };
        assert_eq!(records[0].merchant_id.as_deref(), Some("M001"));
        assert_eq!(records[0].total_count, 3);
        assert_eq!(records[0].total_amount, 300.5);
        assert_eq!(records[0].refund_amount, 0.0);
        assert_eq!(records[0].file_id, file_id);
    }

    #[test]
    fn test_detail_batch_soft_tax_failure() {
        let rows = vec![row(&[
            ("transaction_id", "T1"),
            ("transaction_time", "2024-03-01 10:00:00"),
            ("transaction_amount", "10.00"),
            ("tax", "--"),
            ("status", "成功"),
        ])];

        let batch = build_batch(FileKind::Detail, Uuid::new_v4(), &rows).unwrap();
        let SectionBatch::Detail(records) = batch else {
            panic!("expected detail batch");
        };
        assert_eq!(records[0].tax, 0.0);
        assert_eq!(records[0].transaction_amount, 10.0);
        assert_eq!(records[0].status, Some(TransactionStatus::Success));
    }

    #[test]
    fn test_detail_batch_hard_amount_failure_rejects_all_rows() {
        let rows = vec![
            row(&[("transaction_id", "T1"), ("transaction_amount", "10.00")]),
            row(&[("transaction_id", "T2"), ("transaction_amount", "ten")]),
        ];

        let err = build_batch(FileKind::Detail, Uuid::new_v4(), &rows).unwrap_err();
        assert_eq!(err.field, "transaction_amount");
        assert_eq!(err.value, "ten");
    }

    #[test]
    fn test_transaction_batch_unknown_status_is_unset() {
        let rows = vec![row(&[
            ("transaction_id", "T9"),
            ("transaction_amount", "5"),
            ("status", "unknown"),
            ("channel", "alipay"),
        ])];

        let batch = build_batch(FileKind::Transaction, Uuid::new_v4(), &rows).unwrap();
        let SectionBatch::Transaction(records) = batch else {
            panic!("expected transaction batch");
        };
        assert_eq!(records[0].status, None);
        assert_eq!(records[0].channel.as_deref(), Some("alipay"));
    }

    #[test]
    fn test_empty_rows_build_empty_batch() {
        let batch = build_batch(FileKind::Detail, Uuid::new_v4(), &[]).unwrap();
        assert!(batch.is_empty());
    }
}
