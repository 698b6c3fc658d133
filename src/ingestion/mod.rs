//! Ingestion Module
//!
//! Turns an uploaded file buffer into bounded row batches:
//! - Delimiter detection from the declared MIME kind
//! - Header normalization
//! - Streaming, chunked parsing with per-cell coercion

pub mod streaming;

pub use streaming::{parse_streaming, ChunkIterator, ParseOptions, StreamingParse};

use crate::value::Scalar;
use std::collections::HashSet;
use std::sync::Arc;

/// A bounded slice of parsed rows, aligned to the dataset's column order.
#[derive(Debug, Clone)]
pub struct RowBatch {
    pub columns: Arc<[String]>,
    pub rows: Vec<Vec<Scalar>>,
    /// Index of the first row of this batch within the whole file.
    pub offset: usize,
}

impl RowBatch {
    pub fn new(columns: Arc<[String]>, rows: Vec<Vec<Scalar>>, offset: usize) -> Self {
        Self {
            columns,
            rows,
            offset,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Resolve the field delimiter for a declared MIME kind, falling back to the file
/// extension for generic binary uploads. `None` means the kind is unsupported.
pub fn detect_delimiter(mime: &str, file_name: &str) -> Option<u8> {
    let mime = mime
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "text/csv" | "application/csv" | "text/plain" | "application/vnd.ms-excel" => Some(b','),
        "text/tab-separated-values" => Some(b'\t'),
        "" | "application/octet-stream" => {
            let lower = file_name.to_ascii_lowercase();
            if lower.ends_with(".csv") || lower.ends_with(".txt") {
                Some(b',')
            } else if lower.ends_with(".tsv") || lower.ends_with(".tab") {
                Some(b'\t')
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Trim headers, name blank ones positionally and de-duplicate repeats.
/// A generated `{name}_{k}` never collides with another header in the file.
pub fn normalize_headers<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let bases: Vec<String> = raw
        .into_iter()
        .enumerate()
        .map(|(idx, header)| {
            let trimmed = header.trim().trim_start_matches('\u{feff}').trim();
            if trimmed.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                trimmed.to_string()
            }
        })
        .collect();

    let reserved: HashSet<&str> = bases.iter().map(String::as_str).collect();
    let mut used: HashSet<String> = HashSet::with_capacity(bases.len());
    let mut headers = Vec::with_capacity(bases.len());
    for base in &bases {
        let name = if used.contains(base) {
            (2..)
                .map(|k| format!("{}_{}", base, k))
                .find(|candidate| !used.contains(candidate) && !reserved.contains(candidate.as_str()))
                .unwrap_or_else(|| base.clone())
        } else {
            base.clone()
        };
        used.insert(name.clone());
        headers.push(name);
    }
    headers
}
