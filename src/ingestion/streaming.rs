//! Streaming CSV parser
//!
//! A counting pass fixes the total row count up front, then [`ChunkIterator`]
//! re-reads the buffer and hands out at most `chunk_size` parsed rows at a time.
//! Only the raw payload is held for the whole parse.

use crate::error::{Result, TabulaError};
use crate::ingestion::{normalize_headers, RowBatch};
use crate::value::Scalar;
use csv::{ByteRecord, Reader, ReaderBuilder};
use std::sync::Arc;
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub chunk_size: usize,
    pub delimiter: u8,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
            delimiter: b',',
        }
    }
}

pub struct StreamingParse<'a> {
    pub total_row_count: usize,
    pub column_names: Arc<[String]>,
    pub chunks: ChunkIterator<'a>,
}

pub fn parse_streaming<'a>(payload: &'a [u8], options: &ParseOptions) -> Result<StreamingParse<'a>> {
    let payload = payload.strip_prefix(UTF8_BOM).unwrap_or(payload);
    if payload.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(TabulaError::Ingestion("file is empty".to_string()));
    }

    let total_row_count = count_records(payload, options.delimiter)?;

    let mut reader = reader_for(payload, options.delimiter);
    let headers = reader.byte_headers()?.clone();
    if headers.is_empty() {
        return Err(TabulaError::Ingestion("file has no header row".to_string()));
    }
    let header_text: Vec<String> = headers
        .iter()
        .map(|h| String::from_utf8_lossy(h).into_owned())
        .collect();
    let column_names: Arc<[String]> =
        normalize_headers(header_text.iter().map(String::as_str)).into();

    debug!(
        rows = total_row_count,
        columns = column_names.len(),
        chunk_size = options.chunk_size,
        "Prepared streaming parse"
    );

    Ok(StreamingParse {
        total_row_count,
        column_names: column_names.clone(),
        chunks: ChunkIterator {
            reader,
            columns: column_names,
            chunk_size: options.chunk_size.max(1),
            rows_processed: 0,
            record: ByteRecord::new(),
            done: false,
        },
    })
}

fn reader_for(payload: &[u8], delimiter: u8) -> Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(payload)
}

fn count_records(payload: &[u8], delimiter: u8) -> Result<usize> {
    let mut reader = reader_for(payload, delimiter);
    let mut record = ByteRecord::new();
    let mut count = 0usize;
    while reader.read_byte_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}

/// Yields [`RowBatch`]es of at most `chunk_size` rows until the payload is exhausted.
pub struct ChunkIterator<'a> {
    reader: Reader<&'a [u8]>,
    columns: Arc<[String]>,
    chunk_size: usize,
    rows_processed: usize,
    record: ByteRecord,
    done: bool,
}

impl ChunkIterator<'_> {
    pub fn rows_processed(&self) -> usize {
        self.rows_processed
    }

    fn read_chunk(&mut self) -> Result<Vec<Vec<Scalar>>> {
        let width = self.columns.len();
        let mut rows = Vec::with_capacity(self.chunk_size);
        while rows.len() < self.chunk_size {
            if !self.reader.read_byte_record(&mut self.record)? {
                self.done = true;
                break;
            }
            let mut row = Vec::with_capacity(width);
            for idx in 0..width {
                let cell = match self.record.get(idx) {
                    Some(bytes) => Scalar::from_cell(&String::from_utf8_lossy(bytes)),
                    None => Scalar::Null,
                };
                row.push(cell);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

impl Iterator for ChunkIterator<'_> {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let offset = self.rows_processed;
        match self.read_chunk() {
            Ok(rows) if rows.is_empty() => None,
            Ok(rows) => {
                self.rows_processed += rows.len();
                Some(Ok(RowBatch::new(self.columns.clone(), rows, offset)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
