// Header normalization and required-header validation

use crate::models::FileKind;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

lazy_static! {
    /// Provider header text to canonical field name
    static ref HEADER_MAP: HashMap<&'static str, &'static str> = [
        ("商户号", "merchant_id"),
        ("商户名称", "merchant_name"),
        ("结算日期", "settle_date"),
        ("总笔数", "total_count"),
        ("总金额", "total_amount"),
        ("退款笔数", "refund_count"),
        ("退款金额", "refund_amount"),
        ("手续费", "fee_amount"),
        ("税费", "tax"),
        ("结算金额", "net_amount"),
        ("币种", "currency"),
        ("交易流水号", "transaction_id"),
        ("商户订单号", "merchant_order_no"),
        ("交易时间", "transaction_time"),
        ("交易类型", "transaction_type"),
        ("交易金额", "transaction_amount"),
        ("交易状态", "status"),
        ("支付渠道", "channel"),
        ("付款账号", "payer_account"),
        ("备注", "remark"),
    ]
    .into_iter()
    .collect();
}

const SUMMARY_REQUIRED: &[&str] = &["merchant_id", "settle_date", "total_count", "total_amount"];
const DETAIL_REQUIRED: &[&str] = &["transaction_id", "transaction_time", "transaction_amount"];
const TRANSACTION_REQUIRED: &[&str] = &["transaction_id", "transaction_amount", "status"];

/// Fields a section of `kind` must carry to be loaded
pub fn required_headers(kind: FileKind) -> &'static [&'static str] {
    match kind {
        FileKind::Summary => SUMMARY_REQUIRED,
        FileKind::Detail => DETAIL_REQUIRED,
        FileKind::Transaction => TRANSACTION_REQUIRED,
    }
}

/// Canonical name for a header; unknown headers pass through unchanged
pub fn normalize_header(header: &str) -> String {
    let header = header.trim();
    HEADER_MAP
        .get(header)
        .map(|canonical| canonical.to_string())
        .unwrap_or_else(|| header.to_string())
}

pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    headers.iter().map(|h| normalize_header(h)).collect()
}

/// Whether every required field of `kind` is among `headers`
///
/// Order and duplicates do not matter. The checklist is returned so
/// callers can report what was expected.
pub fn validate_headers(headers: &[String], kind: FileKind) -> (bool, &'static [&'static str]) {
    let required = required_headers(kind);
    let present: HashSet<&str> = headers.iter().map(String::as_str).collect();
    let valid = required.iter().all(|field| present.contains(field));
    (valid, required)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_known_headers_are_mapped() {
        assert_eq!(normalize_header("交易金额"), "transaction_amount");
        assert_eq!(normalize_header(" 商户号 "), "merchant_id");
    }

    #[test]
    fn test_unknown_header_passes_through() {
        assert_eq!(normalize_header("批次号"), "批次号");
        assert_eq!(normalize_header("transaction_id"), "transaction_id");
    }

    #[test]
    fn test_validation_is_order_independent() {
        let headers = strings(&["transaction_amount", "transaction_time", "transaction_id"]);
        let (valid, required) = validate_headers(&headers, FileKind::Detail);
        assert!(valid);
        assert_eq!(required, DETAIL_REQUIRED);
    }

    #[test]
    fn test_validation_ignores_duplicates_and_extras() {
        let headers = strings(&[
            "merchant_id",
            "merchant_id",
            "settle_date",
            "total_count",
            "total_amount",
            "remark",
        ]);
        assert!(validate_headers(&headers, FileKind::Summary).0);
    }

    #[test]
    fn test_validation_reports_checklist_on_failure() {
        let headers = normalize_headers(&strings(&["交易流水号", "交易金额"]));
        let (valid, required) = validate_headers(&headers, FileKind::Detail);
        assert!(!valid);
        assert!(required.contains(&"transaction_time"));
    }

    #[test]
    fn test_transaction_checklist_requires_status() {
        let headers = strings(&["transaction_id", "transaction_amount"]);
        assert!(!validate_headers(&headers, FileKind::Transaction).0);
    }
}
