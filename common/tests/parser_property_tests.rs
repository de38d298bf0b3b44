// Property-based tests for line splitting, section layout, headers and key derivation

use common::models::FileKind;
use common::parser::{normalize_header, parse_sections, required_headers, split_fields, validate_headers};
use common::storage::key_from_remote_path;
use proptest::prelude::*;

// ============================================================================
// Property Generators
// ============================================================================

/// A field without commas or surrounding whitespace; quotes are literal
fn arb_field() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9.\"]{1,8}"
}

fn arb_line() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(arb_field(), 1..8)
}

fn arb_segment() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,8}"
}

fn arb_header() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(vec![
            "商户号", "结算日期", "总金额", "交易流水号", "交易金额", "交易状态", "备注",
        ])
        .prop_map(str::to_string),
        "[a-z_]{1,12}",
    ]
}

// ============================================================================
// Property Tests
// ============================================================================

#[test]
fn property_split_count_is_commas_plus_one() {
    proptest!(ProptestConfig::with_cases(200), |(fields in arb_line())| {
        let line = fields.join(",");
        let commas = line.matches(',').count();

        let split = split_fields(&line).unwrap();

        prop_assert_eq!(split.len(), commas + 1);
        prop_assert_eq!(split, fields);
    });
}

#[test]
fn property_fixed_layout_ignores_leading_and_repeated_blank_lines() {
    proptest!(ProptestConfig::with_cases(100), |(
        summary_header in arb_line(),
        summary_row in arb_line(),
        detail_header in arb_line(),
        detail_rows in prop::collection::vec(arb_line(), 0..5),
        leading_blanks in 0usize..3,
        separator_blanks in 1usize..4,
    )| {
        let mut lines = vec![String::new(); leading_blanks];
        lines.push(summary_header.join(","));
        lines.push(summary_row.join(","));
        lines.extend(std::iter::repeat(String::new()).take(separator_blanks));
        lines.push(detail_header.join(","));
        lines.extend(detail_rows.iter().map(|row| row.join(",")));
        let text = lines.join("\n");

        let parsed = parse_sections(&text).unwrap();

        let summary = parsed.summary.unwrap();
        let detail = parsed.detail.unwrap();
        prop_assert_eq!(summary.headers, summary_header);
        prop_assert_eq!(summary.records, vec![summary_row]);
        prop_assert_eq!(detail.headers, detail_header);
        prop_assert_eq!(detail.records, detail_rows);
    });
}

#[test]
fn property_normalize_header_is_idempotent() {
    proptest!(ProptestConfig::with_cases(100), |(header in arb_header())| {
        let once = normalize_header(&header);
        prop_assert_eq!(normalize_header(&once), once);
    });
}

#[test]
fn property_validation_ignores_order_and_extras() {
    proptest!(ProptestConfig::with_cases(100), |(
        kind in prop::sample::select(vec![FileKind::Summary, FileKind::Detail, FileKind::Transaction]),
        extras in prop::collection::vec("x_[a-z]{1,6}", 0..4),
        seed in any::<u64>(),
    )| {
        let mut headers: Vec<String> = required_headers(kind).iter().map(|h| h.to_string()).collect();
        headers.extend(extras);
        let len = headers.len();
        headers.rotate_left((seed as usize) % len);

        let (valid, _) = validate_headers(&headers, kind);
        prop_assert!(valid);

        headers.remove((seed as usize) % len.min(required_headers(kind).len()).max(1));
        let missing_required = required_headers(kind)
            .iter()
            .any(|field| !headers.iter().any(|h| h == field));
        let (valid, _) = validate_headers(&headers, kind);
        prop_assert_eq!(valid, !missing_required);
    });
}

#[test]
fn property_key_strips_root_and_leading_slash() {
    proptest!(ProptestConfig::with_cases(200), |(
        root in prop::collection::vec(arb_segment(), 1..4),
        relative in prop::collection::vec(arb_segment(), 1..4),
    )| {
        let root = format!("/{}", root.join("/"));
        let relative = relative.join("/");
        let remote_path = format!("{}/{}", root, relative);

        let key = key_from_remote_path(&remote_path, &root);

        prop_assert!(!key.starts_with('/'));
        prop_assert_eq!(key, relative);
    });
}

#[test]
fn property_key_without_prefix_only_drops_leading_slash() {
    proptest!(ProptestConfig::with_cases(100), |(
        segments in prop::collection::vec(arb_segment(), 1..5),
    )| {
        let relative = segments.join("/");
        let key = key_from_remote_path(&format!("/{}", relative), "");
        prop_assert_eq!(key, relative);
    });
}
