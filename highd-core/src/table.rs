//! Minimal CSV reader producing string-keyed rows.
//!
//! Handles the subset of CSV written by the highD tooling and by
//! spreadsheet exports of coefficient tables: comma separators, optional
//! double-quoted fields with `""` escapes, CRLF line endings, and a UTF-8
//! byte-order mark on the header.

use std::collections::HashMap;
use std::path::Path;

use crate::types::{HsmError, Result};

/// One CSV record keyed by header name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: HashMap<String, String>,
}

impl Row {
    /// Trimmed, non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First non-empty value among `keys`.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Optional numeric field. Absent or empty is `None`; present but
    /// malformed (or NaN/infinite) is a parse error.
    pub fn parse_f64(&self, key: &str, context: &str) -> Result<Option<f64>> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(HsmError::Parse {
                context: context.to_string(),
                field: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// Required numeric field.
    pub fn require_f64(&self, key: &str, context: &str) -> Result<f64> {
        self.parse_f64(key, context)?
            .ok_or_else(|| HsmError::MissingField {
                context: context.to_string(),
                field: key.to_string(),
            })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Row {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse CSV text with a header line into rows.
///
/// Blank lines are skipped. Records shorter than the header leave the
/// missing columns absent; extra trailing fields are dropped.
pub fn read_csv_str(text: &str) -> Vec<Row> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header: Vec<String> = match lines.next() {
        Some(line) => split_record(line)
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect(),
        None => return Vec::new(),
    };

    lines
        .map(|line| {
            header
                .iter()
                .zip(split_record(line))
                .map(|(k, v)| (k.clone(), v))
                .collect::<Row>()
        })
        .collect()
}

/// Read and parse a CSV file.
pub fn read_csv_file(path: &Path) -> Result<Vec<Row>> {
    if !path.exists() {
        return Err(HsmError::MissingFile(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    Ok(read_csv_str(&text))
}

/// Split one CSV record into fields.
fn split_record(line: &str) -> Vec<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
