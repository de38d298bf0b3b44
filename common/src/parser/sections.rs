// Section extraction for provider CSV exports
//
// Fields are split on every comma. Provider exports never quote fields, so
// quoting is disabled and a comma inside a value splits it in two.

use crate::errors::ParseError;
use csv::{ReaderBuilder, Trim};
use std::collections::HashMap;

/// Canonical field name to raw value
pub type RowMap = HashMap<String, String>;

/// One block of a CSV file: a header line and its data lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl Section {
    fn with_headers(headers: Vec<String>) -> Self {
        Self {
            headers,
            records: Vec::new(),
        }
    }

    /// Project each record onto its header, ignoring fields beyond the
    /// header's width and leaving missing trailing fields absent
    pub fn to_row_maps(&self) -> Vec<RowMap> {
        self.records
            .iter()
            .map(|record| {
                self.headers
                    .iter()
                    .zip(record.iter())
                    .map(|(header, value)| (header.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }
}

/// Summary and detail blocks of a multi-section file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSections {
    pub summary: Option<Section>,
    pub detail: Option<Section>,
}

/// A non-blank line and its position counted from the first non-blank
/// line, where each run of blank lines occupies a single position
#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    position: usize,
    fields: Vec<String>,
}

/// Zero fields or a single empty field
fn is_padding(fields: &[String]) -> bool {
    fields.is_empty() || (fields.len() == 1 && fields[0].is_empty())
}

fn line_reader() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .trim(Trim::All);
    builder
}

fn split_with(builder: &ReaderBuilder, line: &str, index: usize) -> Result<Vec<String>, ParseError> {
    let mut reader = builder.from_reader(line.as_bytes());
    match reader.records().next() {
        Some(Ok(record)) => Ok(record.iter().map(str::to_string).collect()),
        Some(Err(e)) => Err(ParseError::Csv {
            line: index + 1,
            reason: e.to_string(),
        }),
        None => Ok(Vec::new()),
    }
}

/// Split one line on commas
pub fn split_fields(line: &str) -> Result<Vec<String>, ParseError> {
    split_with(&line_reader(), line, 0)
}

fn read_lines(text: &str) -> Result<Vec<Line>, ParseError> {
    let builder = line_reader();
    let mut lines: Vec<Line> = Vec::new();
    let mut after_gap = false;

    for (index, raw) in text.lines().enumerate() {
        let fields = split_with(&builder, raw, index)?;
        if is_padding(&fields) {
            after_gap = !lines.is_empty();
            continue;
        }
        let position = match lines.last() {
            Some(previous) if after_gap => previous.position + 2,
            Some(previous) => previous.position + 1,
            None => 0,
        };
        after_gap = false;
        lines.push(Line { position, fields });
    }

    Ok(lines)
}

/// Split a multi-section file into its summary and detail blocks
///
/// Positions start at the first non-blank line and a run of blank lines
/// counts as one position, so leading blanks and doubled separators do not
/// shift the layout.
///
/// Fixed layout, used when positions 0 and 3 both carry content: position 0
/// is the summary header, positions 1 and 2 are summary rows (position 2 is
/// normally the blank separator), position 3 is the detail header and later
/// positions are detail rows.
///
/// Otherwise lines are counted without blanks. Three or more: the first
/// is a header shared by both blocks, the second is the summary row and
/// the rest are detail rows. Exactly two: summary only. Fewer: nothing.
pub fn parse_sections(text: &str) -> Result<ParsedSections, ParseError> {
    let lines = read_lines(text)?;

    let has_line = |position: usize| lines.iter().any(|line| line.position == position);

    if has_line(0) && has_line(3) {
        let mut summary = Section::default();
        let mut detail = Section::default();
        for line in lines {
            match line.position {
                0 => summary.headers = line.fields,
                1 | 2 => summary.records.push(line.fields),
                3 => detail.headers = line.fields,
                _ => detail.records.push(line.fields),
            }
        }
        return Ok(ParsedSections {
            summary: Some(summary),
            detail: Some(detail),
        });
    }

    let mut fields = lines.into_iter().map(|line| line.fields);
    match (fields.next(), fields.next()) {
        (Some(header), Some(summary_row)) => {
            let detail_rows: Vec<Vec<String>> = fields.collect();
            let mut summary = Section::with_headers(header.clone());
            summary.records.push(summary_row);

            let detail = if detail_rows.is_empty() {
                None
            } else {
                Some(Section {
                    headers: header,
                    records: detail_rows,
                })
            };

            Ok(ParsedSections {
                summary: Some(summary),
                detail,
            })
        }
        _ => Ok(ParsedSections::default()),
    }
}

/// Header line followed by data lines, for single-section transaction files
pub fn parse_flat(text: &str) -> Result<Option<Section>, ParseError> {
    let mut fields = read_lines(text)?.into_iter().map(|line| line.fields);
    Ok(fields.next().map(|headers| Section {
        headers,
        records: fields.collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RowMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_fixed_layout_with_blank_separator() {
        let text = ["h1,h2", "v1,v2", "", "d1,d2", "x1,x2"].join("\n");
        let parsed = parse_sections(&text).unwrap();

        let summary = parsed.summary.unwrap();
        let detail = parsed.detail.unwrap();
        assert_eq!(summary.to_row_maps(), vec![row(&[("h1", "v1"), ("h2", "v2")])]);
        assert_eq!(detail.to_row_maps(), vec![row(&[("d1", "x1"), ("d2", "x2")])]);
    }

    #[test]
    fn test_fixed_layout_skips_padding_detail_rows() {
        let text = "h1,h2\nv1,v2\n\nd1,d2\nx1,x2\n   \n\ny1,y2\n";
        let detail = parse_sections(text).unwrap().detail.unwrap();
        assert_eq!(detail.records.len(), 2);
        assert_eq!(detail.records[1], vec!["y1", "y2"]);
    }

    #[test]
    fn test_fixed_layout_with_two_summary_rows() {
        let text = "h1\nv1\nv2\nd1\nx1\n";
        let parsed = parse_sections(text).unwrap();
        assert_eq!(parsed.summary.unwrap().records.len(), 2);
        assert_eq!(parsed.detail.unwrap().records, vec![vec!["x1".to_string()]]);
    }

    #[test]
    fn test_fixed_layout_with_no_detail_rows() {
        let text = "h1\nv1\n\nd1\n";
        let detail = parse_sections(text).unwrap().detail.unwrap();
        assert_eq!(detail.headers, vec!["d1"]);
        assert!(detail.records.is_empty());
    }

    #[test]
    fn test_leading_blank_lines_do_not_shift_layout() {
        let text = "\n\nh1,h2\nv1,v2\n\nd1,d2\nx1,x2\n";
        let parsed = parse_sections(text).unwrap();

        let summary = parsed.summary.unwrap();
        let detail = parsed.detail.unwrap();
        assert_eq!(summary.headers, vec!["h1", "h2"]);
        assert_eq!(detail.headers, vec!["d1", "d2"]);
        assert_eq!(detail.records, vec![vec!["x1".to_string(), "x2".to_string()]]);
    }

    #[test]
    fn test_doubled_separator_counts_once() {
        let text = "h1,h2\nv1,v2\n\n\n\nd1,d2\nx1,x2\n";
        let parsed = parse_sections(text).unwrap();

        let summary = parsed.summary.unwrap();
        let detail = parsed.detail.unwrap();
        assert_eq!(summary.records, vec![vec!["v1".to_string(), "v2".to_string()]]);
        assert_eq!(detail.headers, vec!["d1", "d2"]);
        assert_eq!(detail.records, vec![vec!["x1".to_string(), "x2".to_string()]]);
    }

    #[test]
    fn test_loose_layout_shares_header() {
        let text = "h1,h2\nv1,v2\nr1,r2\n\nr3,r4\n";
        // Position 3 is the blank run, so the fixed layout does not apply
        let parsed = parse_sections(text).unwrap();

        let summary = parsed.summary.unwrap();
        let detail = parsed.detail.unwrap();
        assert_eq!(summary.records, vec![vec!["v1".to_string(), "v2".to_string()]]);
        assert_eq!(detail.headers, summary.headers);
        assert_eq!(detail.records.len(), 2);
    }

    #[test]
    fn test_three_lines_use_loose_layout() {
        let parsed = parse_sections("h1\nv1\nr1\n").unwrap();
        assert_eq!(parsed.summary.unwrap().records.len(), 1);
        assert_eq!(parsed.detail.unwrap().records, vec![vec!["r1".to_string()]]);
    }

    #[test]
    fn test_two_lines_yield_summary_only() {
        let parsed = parse_sections("h1,h2\nv1,v2\n").unwrap();
        assert!(parsed.summary.is_some());
        assert!(parsed.detail.is_none());
    }

    #[test]
    fn test_single_line_yields_nothing() {
        assert_eq!(parse_sections("h1,h2\n").unwrap(), ParsedSections::default());
        assert_eq!(parse_sections("").unwrap(), ParsedSections::default());
    }

    #[test]
    fn test_embedded_comma_splits_field() {
        let fields = split_fields("T1,Acme, Inc.,100.00").unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[1], "Acme");
        assert_eq!(fields[2], "Inc.");
    }

    #[test]
    fn test_quotes_are_not_special() {
        let fields = split_fields("\"a,b\",c").unwrap();
        assert_eq!(fields, vec!["\"a", "b\"", "c"]);
    }

    #[test]
    fn test_fields_are_trimmed() {
        assert_eq!(split_fields(" a , b ").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let text = "h1,h2\r\nv1,v2\r\n\r\nd1,d2\r\nx1,x2\r\n";
        let parsed = parse_sections(text).unwrap();
        assert_eq!(parsed.detail.unwrap().records, vec![vec!["x1".to_string(), "x2".to_string()]]);
    }

    #[test]
    fn test_short_record_leaves_trailing_fields_absent() {
        let section = Section {
            headers: vec!["a".into(), "b".into()],
            records: vec![vec!["1".into()]],
        };
        let rows = section.to_row_maps();
        assert_eq!(rows[0].get("a").map(String::as_str), Some("1"));
        assert!(!rows[0].contains_key("b"));
    }

    #[test]
    fn test_parse_flat() {
        let section = parse_flat("id,amount\n\nT1,1.00\nT2,2.00\n").unwrap().unwrap();
        assert_eq!(section.headers, vec!["id", "amount"]);
        assert_eq!(section.records.len(), 2);
        assert!(parse_flat("\n\n").unwrap().is_none());
    }
}
