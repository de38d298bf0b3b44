// Field coercion with an explicit per-field failure policy

use crate::errors::CoercionError;
use crate::models::{FileKind, TransactionStatus};
use crate::parser::RowMap;
use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use std::collections::HashMap;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What happens when a field is missing, empty or unparseable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPolicy {
    /// Reject the whole section
    HardFail,
    /// Store zero
    DefaultZero,
    /// Leave the field unset
    DefaultNil,
}

/// Fields with a numeric or date policy; anything else is optional text
const POLICIES: &[(FileKind, &str, FieldPolicy)] = &[
    (FileKind::Summary, "total_count", FieldPolicy::DefaultZero),
    (FileKind::Summary, "total_amount", FieldPolicy::DefaultZero),
    (FileKind::Summary, "refund_count", FieldPolicy::DefaultZero),
    (FileKind::Summary, "refund_amount", FieldPolicy::DefaultZero),
    (FileKind::Summary, "fee_amount", FieldPolicy::DefaultZero),
    (FileKind::Summary, "net_amount", FieldPolicy::DefaultZero),
    (FileKind::Summary, "settle_date", FieldPolicy::DefaultNil),
    (FileKind::Detail, "transaction_amount", FieldPolicy::HardFail),
    (FileKind::Detail, "fee_amount", FieldPolicy::DefaultZero),
    (FileKind::Detail, "tax", FieldPolicy::DefaultZero),
    (FileKind::Detail, "net_amount", FieldPolicy::DefaultZero),
    (FileKind::Detail, "transaction_time", FieldPolicy::DefaultNil),
    (FileKind::Transaction, "transaction_amount", FieldPolicy::HardFail),
    (FileKind::Transaction, "transaction_time", FieldPolicy::DefaultNil),
];

lazy_static! {
    static ref STATUS_MAP: HashMap<&'static str, TransactionStatus> = [
        ("成功", TransactionStatus::Success),
        ("失败", TransactionStatus::Failed),
        ("处理中", TransactionStatus::Processing),
        ("已退款", TransactionStatus::Refunded),
        ("已关闭", TransactionStatus::Closed),
    ]
    .into_iter()
    .collect();
}

pub fn policy_for(kind: FileKind, field: &str) -> FieldPolicy {
    POLICIES
        .iter()
        .find(|(k, f, _)| *k == kind && *f == field)
        .map(|(_, _, policy)| *policy)
        .unwrap_or(FieldPolicy::DefaultNil)
}

fn raw<'a>(row: &'a RowMap, field: &str) -> &'a str {
    row.get(field).map(|v| v.trim()).unwrap_or("")
}

/// Parse a field, applying its policy when the value is unusable
///
/// `Ok(None)` means the caller should use its fallback (zero or unset).
fn apply<T>(
    row: &RowMap,
    kind: FileKind,
    field: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, CoercionError> {
    let value = raw(row, field);
    if let Some(parsed) = (!value.is_empty()).then(|| parse(value)).flatten() {
        return Ok(Some(parsed));
    }

    match policy_for(kind, field) {
        FieldPolicy::HardFail => Err(CoercionError {
            field: field.to_string(),
            value: value.to_string(),
            reason: if value.is_empty() {
                "required value is missing".to_string()
            } else {
                "not a valid number".to_string()
            },
        }),
        FieldPolicy::DefaultZero | FieldPolicy::DefaultNil => Ok(None),
    }
}

fn parse_amount(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_count(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().or_else(|| {
        parse_amount(value)
            .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
            .map(|v| v as i64)
    })
}

pub fn amount(row: &RowMap, kind: FileKind, field: &str) -> Result<f64, CoercionError> {
    Ok(apply(row, kind, field, parse_amount)?.unwrap_or(0.0))
}

pub fn count(row: &RowMap, kind: FileKind, field: &str) -> Result<i64, CoercionError> {
    Ok(apply(row, kind, field, parse_count)?.unwrap_or(0))
}

pub fn date(row: &RowMap, kind: FileKind, field: &str) -> Result<Option<NaiveDate>, CoercionError> {
    apply(row, kind, field, |v| NaiveDate::parse_from_str(v, DATE_FORMAT).ok())
}

pub fn timestamp(
    row: &RowMap,
    kind: FileKind,
    field: &str,
) -> Result<Option<NaiveDateTime>, CoercionError> {
    apply(row, kind, field, |v| {
        NaiveDateTime::parse_from_str(v, DATETIME_FORMAT).ok()
    })
}

/// Trimmed text, unset when empty
pub fn text(row: &RowMap, field: &str) -> Option<String> {
    let value = raw(row, field);
    (!value.is_empty()).then(|| value.to_string())
}

/// Map provider status text; unknown values are unset
pub fn transaction_status(row: &RowMap) -> Option<TransactionStatus> {
    let value = raw(row, "status");
    STATUS_MAP.get(value).copied()
}
