//! File ingestion: CSV and JSON files become registry-ready rows.
//!
//! Parse failures stay local to the upload. Nothing here touches
//! workspace state.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};

use crate::dataset::{Row, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    UnsupportedFormat(String),
    EmptyFile,
    MalformedContent(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::UnsupportedFormat(ext) => {
                write!(f, "unsupported file format {:?} (expected .csv or .json)", ext)
            }
            IngestError::EmptyFile => write!(f, "file contains no data rows"),
            IngestError::MalformedContent(msg) => write!(f, "malformed content: {}", msg),
        }
    }
}

impl std::error::Error for IngestError {}

/// Parses file content by the extension carried in `name`.
pub fn parse_named(name: &str, content: &str) -> Result<(Vec<String>, Vec<Row>), IngestError> {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "csv" => parse_csv(content),
        "json" => parse_json(content),
        other => Err(IngestError::UnsupportedFormat(other.to_string())),
    }
}

/// Reads and parses a file from disk; returns (file name, columns, rows).
pub fn load_path(path: &Path) -> Result<(String, Vec<String>, Vec<Row>)> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset")
        .to_string();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let (columns, rows) = parse_named(&name, &content)?;
    Ok((name, columns, rows))
}

/// Comma-delimited CSV. First non-empty line is the header. Quoted fields
/// may contain commas and doubled-quote escapes. Cells that parse as
/// finite numbers become numbers, everything else stays text.
pub fn parse_csv(content: &str) -> Result<(Vec<String>, Vec<Row>), IngestError> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header_line = lines.next().ok_or(IngestError::EmptyFile)?;
    let columns = split_csv_line(header_line);
    if columns.is_empty() || columns.iter().all(|c| c.is_empty()) {
        return Err(IngestError::MalformedContent("empty header line".to_string()));
    }

    let mut rows = Vec::new();
    for line in lines {
        let cells = split_csv_line(line);
        let mut row = Row::new();
        for (i, col) in columns.iter().enumerate() {
            let raw = cells.get(i).map(|s| s.as_str()).unwrap_or("");
            row.insert(col.clone(), coerce_cell(raw));
        }
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(IngestError::EmptyFile);
    }
    Ok((columns, rows))
}

/// JSON array of flat objects. Scalar types are kept as-is; nested
/// structures are rejected. Columns are the union of keys across rows.
pub fn parse_json(content: &str) -> Result<(Vec<String>, Vec<Row>), IngestError> {
    let parsed: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| IngestError::MalformedContent(e.to_string()))?;
    let arr = parsed
        .as_array()
        .ok_or_else(|| IngestError::MalformedContent("expected a top-level array of objects".to_string()))?;
    if arr.is_empty() {
        return Err(IngestError::EmptyFile);
    }

    let mut columns: Vec<String> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut rows = Vec::with_capacity(arr.len());
    for (idx, item) in arr.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| IngestError::MalformedContent(format!("element {} is not an object", idx)))?;
        let mut row = Row::new();
        for (key, val) in obj {
            let cell = match val {
                serde_json::Value::Null => Value::Null,
                serde_json::Value::Bool(b) => Value::Bool(*b),
                serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
                serde_json::Value::String(s) => Value::Text(s.clone()),
                _ => {
                    return Err(IngestError::MalformedContent(format!(
                        "element {} field {:?} is not a scalar",
                        idx, key
                    )))
                }
            };
            if seen.insert(key.clone()) {
                columns.push(key.clone());
            }
            row.insert(key.clone(), cell);
        }
        rows.push(row);
    }
    Ok((columns, rows))
}

fn coerce_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        if let Ok(n) = trimmed.parse::<f64>() {
            if n.is_finite() {
                return Value::Number(n);
            }
        }
    }
    Value::Text(trimmed.to_string())
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(field.trim().to_string());
                field = String::new();
            }
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}
