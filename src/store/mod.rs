//! Columnar Store Adapter
//!
//! Wraps an in-process polars `DataFrame` as the session's analytical store.
//! Row batches are appended as they arrive from ingestion; read-only SQL runs
//! through polars' SQL context against the table name [`DATASET_TABLE`].
//!
//! A store belongs to exactly one session. One-shot callers acquire it through
//! [`StoreRegistry::open`], whose guard closes the store on every exit path.

pub mod convert;
pub mod metadata;
pub mod query_guard;
pub mod registry;

pub use metadata::{ColumnDescriptor, ColumnKind, DatasetMetadata};
pub use registry::{StoreGuard, StoreRegistry};

use crate::error::{Result, TabulaError};
use crate::ingestion::RowBatch;
use crate::stats;
use crate::value::{Record, Scalar};
use polars::prelude::*;
use polars::sql::SQLContext;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Table name queries use to reference the loaded dataset.
pub const DATASET_TABLE: &str = "dataset";
/// Rows returned from a single read-only query before truncation.
pub const MAX_QUERY_ROWS: usize = 10_000;

static NULL_CELL: Scalar = Scalar::Null;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    pub row_count: usize,
    /// True when the engine produced more than [`MAX_QUERY_ROWS`] rows.
    pub truncated: bool,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub column: String,
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub median: Option<f64>,
}

pub struct ColumnarStore {
    session_id: String,
    frame: Option<DataFrame>,
    open: bool,
}

impl ColumnarStore {
    /// Start an empty store for a session.
    pub fn initialize(session_id: &str) -> Self {
        debug!(session_id, "Initializing columnar store");
        Self {
            session_id: session_id.to_string(),
            frame: None,
            open: true,
        }
    }

    pub(crate) fn from_frame(session_id: &str, frame: DataFrame) -> Self {
        Self {
            session_id: session_id.to_string(),
            frame: Some(frame),
            open: true,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn row_count(&self) -> usize {
        self.frame.as_ref().map(|f| f.height()).unwrap_or(0)
    }

    /// Append one batch. Columns stay `Float64` while every loaded cell is
    /// numeric and are promoted to `String` once text shows up.
    pub fn load_chunk(&mut self, batch: &RowBatch) -> Result<usize> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(self.row_count());
        }

        let mut columns = Vec::with_capacity(batch.columns.len());
        for (idx, name) in batch.columns.iter().enumerate() {
            let cells = batch.rows.iter().map(move |row| row.get(idx).unwrap_or(&NULL_CELL));
            columns.push(convert::series_from_scalars(name, cells));
        }
        let mut chunk = DataFrame::new(columns)?;

        match self.frame.as_mut() {
            None => self.frame = Some(chunk),
            Some(frame) => {
                align_dtypes(frame, &mut chunk)?;
                frame.vstack_mut(&chunk)?;
            }
        }

        let total = self.row_count();
        debug!(
            session_id = %self.session_id,
            offset = batch.offset,
            rows = batch.len(),
            total,
            "Loaded chunk into columnar store"
        );
        Ok(total)
    }

    pub fn compute_metadata(&self) -> Result<DatasetMetadata> {
        DatasetMetadata::from_frame(self.frame()?)
    }

    /// Run a read-only query. Anything other than a single `SELECT` is rejected
    /// before the engine sees it.
    pub fn execute_read_only_query(&self, sql: &str) -> Result<QueryResult> {
        query_guard::ensure_read_only(sql)?;
        let frame = self.frame()?;

        let start_time = Instant::now();
        let mut ctx = SQLContext::new();
        ctx.register(DATASET_TABLE, frame.clone().lazy());
        let result = ctx
            .execute(sql.trim().trim_end_matches(';'))?
            .limit((MAX_QUERY_ROWS + 1) as IdxSize)
            .collect()?;

        let truncated = result.height() > MAX_QUERY_ROWS;
        let rows = convert::dataframe_to_records(&result, MAX_QUERY_ROWS)?;
        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        info!(
            session_id = %self.session_id,
            rows = rows.len(),
            truncated,
            execution_time_ms,
            "Executed read-only query"
        );

        Ok(QueryResult {
            columns: result.get_column_names().iter().map(|s| s.to_string()).collect(),
            row_count: rows.len(),
            rows,
            truncated,
            execution_time_ms,
        })
    }

    pub fn sample_rows(&self, n: usize) -> Result<Vec<Record>> {
        convert::dataframe_to_records(self.frame()?, n)
    }

    pub fn column_names(&self) -> Result<Vec<String>> {
        Ok(self
            .frame()?
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect())
    }

    pub fn column_values(&self, name: &str) -> Result<Vec<Scalar>> {
        convert::column_scalars(self.frame()?, name)
    }

    pub fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>> {
        convert::column_numbers(self.frame()?, name)
    }

    pub fn numeric_stats(&self, columns: &[String]) -> Result<Vec<NumericStats>> {
        let frame = self.frame()?;
        columns
            .iter()
            .map(|name| {
                let values: Vec<f64> = convert::column_numbers(frame, name)?
                    .into_iter()
                    .flatten()
                    .collect();
                let sorted = stats::sorted(&values);
                let summary = stats::min_avg_max(&values);
                Ok(NumericStats {
                    column: name.clone(),
                    count: values.len(),
                    min: summary.map(|s| s.min),
                    max: summary.map(|s| s.max),
                    mean: summary.map(|s| s.avg),
                    std_dev: stats::sample_std_dev(&values),
                    median: stats::median_sorted(&sorted),
                })
            })
            .collect()
    }

    pub fn frame(&self) -> Result<&DataFrame> {
        self.ensure_open()?;
        self.frame
            .as_ref()
            .ok_or_else(|| TabulaError::Store(format!("no dataset loaded for session {}", self.session_id)))
    }

    /// Swap in a transformed dataset (data operations).
    pub fn replace_frame(&mut self, frame: DataFrame) -> Result<()> {
        self.ensure_open()?;
        self.frame = Some(frame);
        Ok(())
    }

    pub(crate) fn take_frame(&mut self) -> Option<DataFrame> {
        self.frame.take()
    }

    /// Release the loaded data. Further calls fail with a store error.
    pub fn close(&mut self) {
        if self.open {
            debug!(session_id = %self.session_id, "Closing columnar store");
        }
        self.open = false;
        self.frame = None;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(TabulaError::Store(format!("store for session {} is closed", self.session_id)))
        }
    }
}

/// Make `chunk` stackable onto `frame` by promoting mismatched columns to text.
fn align_dtypes(frame: &mut DataFrame, chunk: &mut DataFrame) -> Result<()> {
    let names: Vec<String> = frame.get_column_names().iter().map(|s| s.to_string()).collect();
    for name in names {
        let existing = frame.column(&name)?.dtype().clone();
        let incoming = chunk.column(&name)?.dtype().clone();
        if existing == incoming {
            continue;
        }
        if existing != DataType::String {
            let promoted = convert::promote_to_text(frame.column(&name)?)?;
            frame.with_column(promoted)?;
        }
        if incoming != DataType::String {
            let promoted = convert::promote_to_text(chunk.column(&name)?)?;
            chunk.with_column(promoted)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::{parse_streaming, ParseOptions};

    fn load(csv: &str, chunk_size: usize) -> ColumnarStore {
        let parse = parse_streaming(
            csv.as_bytes(),
            &ParseOptions {
                chunk_size,
                delimiter: b',',
            },
        )
        .unwrap();
        let mut store = ColumnarStore::initialize("s1");
        for chunk in parse.chunks {
            store.load_chunk(&chunk.unwrap()).unwrap();
        }
        store
    }

    #[test]
    fn test_chunks_with_late_text_promote_column() {
        let store = load("id,code\n1,10\n2,20\n3,A7\n4,40\n", 2);
        assert_eq!(store.row_count(), 4);
        let frame = store.frame().unwrap();
        assert_eq!(frame.column("id").unwrap().dtype(), &DataType::Float64);
        assert_eq!(frame.column("code").unwrap().dtype(), &DataType::String);

        let meta = store.compute_metadata().unwrap();
        assert_eq!(meta.row_count, 4);
        assert_eq!(meta.column("code").unwrap().kind, ColumnKind::Number);
    }

    #[test]
    fn test_promoted_numbers_group_with_later_text_chunks() {
        let store = load("code\n1\n2\n1\nA\n", 2);
        let result = store
            .execute_read_only_query("SELECT code, COUNT(*) AS n FROM dataset GROUP BY code ORDER BY code")
            .unwrap();
        assert_eq!(result.row_count, 3);
        assert_eq!(result.rows[0]["code"], Scalar::Text("1".to_string()));
        assert_eq!(result.rows[0]["n"], Scalar::Number(2.0));
    }

    #[test]
    fn test_read_only_query_runs_and_rejects_writes() {
        let store = load("region,sales\neast,10\nwest,20\neast,30\n", 10);
        let result = store
            .execute_read_only_query("SELECT region, SUM(sales) AS total FROM dataset GROUP BY region ORDER BY region")
            .unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["region"], Scalar::Text("east".to_string()));
        assert_eq!(result.rows[0]["total"], Scalar::Number(40.0));
        assert!(!result.truncated);

        assert!(matches!(
            store.execute_read_only_query("DELETE FROM dataset"),
            Err(TabulaError::Validation(_))
        ));
    }

    #[test]
    fn test_sample_and_numeric_stats() {
        let store = load("a,b\n1,x\n2,y\n3,z\n4,w\n", 10);
        assert_eq!(store.sample_rows(2).unwrap().len(), 2);

        let stats = store.numeric_stats(&["a".to_string()]).unwrap();
        assert_eq!(stats[0].count, 4);
        assert_eq!(stats[0].min, Some(1.0));
        assert_eq!(stats[0].max, Some(4.0));
        assert_eq!(stats[0].mean, Some(2.5));
        assert_eq!(stats[0].median, Some(2.5));
        assert!(store.numeric_stats(&["missing".to_string()]).is_err());
    }

    #[test]
    fn test_closed_store_refuses_work() {
        let mut store = load("a\n1\n", 10);
        store.close();
        assert!(!store.is_open());
        assert!(matches!(store.compute_metadata(), Err(TabulaError::Store(_))));
    }
}
