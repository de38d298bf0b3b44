// Parsing of staged provider files into header-mapped sections

pub mod content;
pub mod headers;
pub mod sections;

pub use content::extract_text;
pub use headers::{normalize_header, normalize_headers, required_headers, validate_headers};
pub use sections::{parse_flat, parse_sections, split_fields, ParsedSections, RowMap, Section};
