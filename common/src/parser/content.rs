// Decoding of staged objects into CSV text

use crate::errors::ParseError;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

fn is_zip(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".zip")
}

/// CSV text of an object: the first `.csv` member of a ZIP archive, or the
/// object itself for anything else
pub fn extract_text(name: &str, bytes: &[u8]) -> Result<String, ParseError> {
    if is_zip(name) {
        let member = first_csv_member(name, bytes)?;
        decode_utf8(name, &member)
    } else {
        decode_utf8(name, bytes)
    }
}

fn first_csv_member(name: &str, bytes: &[u8]) -> Result<Vec<u8>, ParseError> {
    let zip_error = |e: zip::result::ZipError| ParseError::Zip {
        name: name.to_string(),
        reason: e.to_string(),
    };

    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_error)?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".csv") {
            continue;
        }

        debug!(archive = %name, member = %entry.name(), "Reading CSV member");
        // Declared sizes come from the archive header and are not trusted
        let mut content = Vec::with_capacity(entry.size().min(bytes.len() as u64) as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| ParseError::Zip {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        return Ok(content);
    }

    Err(ParseError::MissingCsvMember(name.to_string()))
}

fn decode_utf8(name: &str, bytes: &[u8]) -> Result<String, ParseError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::Encoding(name.to_string()))
}
