//! Per-job ingestion pipeline.
//!
//! Stages run in a fixed order and map onto progress bands:
//! uploading 5, parsing 10–40, analyzing 40–80, saving 80–100. The first
//! error fails the job with its message; optional steps only log.

use crate::charts::{default_charts, ChartSpec, DownsampleOptions};
use crate::correlation::{self, CorrelationOptions, CorrelationReport};
use crate::dataops::{summarize_frame, ColumnSummary};
use crate::error::{Result, TabulaError};
use crate::ingestion::{parse_streaming, ParseOptions};
use crate::jobs::collaborators::{Collaborators, DatasetRef};
use crate::jobs::job::{DatasetSummary, JobRecorder, JobResult, JobStatus};
use crate::service::AnalysisService;
use crate::store::{ColumnarStore, DatasetMetadata};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Numeric columns used as correlation targets in a job result.
pub const MAX_CORRELATION_TARGETS: usize = 3;
/// Candidates kept per correlation report in a job result.
pub const TOP_CORRELATIONS: usize = 10;

const PARSE_START: u8 = 10;
const ANALYZE_START: u8 = 40;
const SAVE_START: u8 = 80;

/// What a worker needs to run one job.
pub struct JobInput {
    pub session_id: String,
    pub owner: String,
    pub file_name: String,
    pub payload: Vec<u8>,
    pub delimiter: u8,
}

impl JobInput {
    fn dataset(&self) -> DatasetRef<'_> {
        DatasetRef {
            session_id: &self.session_id,
            owner: &self.owner,
            file_name: &self.file_name,
        }
    }
}

struct Analysis {
    metadata: DatasetMetadata,
    columns: Vec<ColumnSummary>,
    correlations: Vec<CorrelationReport>,
    charts: Vec<ChartSpec>,
}

pub struct Pipeline {
    service: Arc<AnalysisService>,
    collaborators: Collaborators,
}

impl Pipeline {
    pub fn new(service: Arc<AnalysisService>, collaborators: Collaborators) -> Self {
        Self { service, collaborators }
    }

    pub fn service(&self) -> &Arc<AnalysisService> {
        &self.service
    }

    /// Run every stage, recording the outcome on the job.
    pub async fn run(&self, recorder: &JobRecorder, input: JobInput) {
        let start_time = Instant::now();
        match self.execute(recorder, &input).await {
            Ok(result) => {
                let rows = result.summary.metadata.row_count;
                match recorder.complete(result) {
                    Ok(()) => info!(
                        job_id = %recorder.id(),
                        session_id = %input.session_id,
                        rows,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Ingestion job completed"
                    ),
                    Err(e) => error!(job_id = %recorder.id(), error = %e, "Could not record job completion"),
                }
            }
            Err(e) => {
                error!(
                    job_id = %recorder.id(),
                    session_id = %input.session_id,
                    stage = ?recorder.status(),
                    error = %e,
                    "Ingestion job failed"
                );
                recorder.fail(e.to_string());
            }
        }
    }

    async fn execute(&self, recorder: &JobRecorder, input: &JobInput) -> Result<JobResult> {
        recorder.advance(JobStatus::Uploading, 5)?;
        let store = self.load(recorder, input).await?;

        recorder.advance(JobStatus::Analyzing, ANALYZE_START)?;
        let Analysis {
            metadata,
            columns,
            correlations,
            charts,
        } = self.analyze(recorder, &store)?;
        let suggestions = self.suggest(recorder, &metadata, &correlations).await;
        let indexed_documents = self.index(recorder, input, &metadata).await;

        recorder.advance(JobStatus::Saving, SAVE_START)?;
        self.service.commit_dataset(store)?;
        self.service.cache_metadata(&input.session_id, metadata.clone());
        recorder.progress(85);

        let summary = DatasetSummary { metadata, columns };
        self.collaborators.sink.save(input.dataset(), &summary).await?;
        recorder.progress(95);

        Ok(JobResult {
            summary,
            charts,
            correlations,
            suggestions,
            indexed_documents,
        })
    }

    /// Parse the payload chunk by chunk into a fresh store, yielding between chunks.
    async fn load(&self, recorder: &JobRecorder, input: &JobInput) -> Result<ColumnarStore> {
        recorder.advance(JobStatus::Parsing, PARSE_START)?;
        let options = ParseOptions {
            chunk_size: self.service.config().chunk_size,
            delimiter: input.delimiter,
        };
        let parse = parse_streaming(&input.payload, &options)?;
        let total = parse.total_row_count;
        let mut chunks = parse.chunks;
        let mut store = ColumnarStore::initialize(&input.session_id);

        while let Some(batch) = chunks.next() {
            let batch = batch?;
            store.load_chunk(&batch)?;
            recorder.progress(band(PARSE_START, ANALYZE_START, chunks.rows_processed(), total));
            tokio::task::yield_now().await;
        }

        if store.row_count() == 0 {
            store.close();
            return Err(TabulaError::Ingestion("file has a header but no data rows".to_string()));
        }
        info!(
            job_id = %recorder.id(),
            rows = store.row_count(),
            columns = parse.column_names.len(),
            "Parsed upload"
        );
        Ok(store)
    }

    fn analyze(&self, recorder: &JobRecorder, store: &ColumnarStore) -> Result<Analysis> {
        let frame = store.frame()?;
        let metadata = store.compute_metadata()?;
        recorder.progress(50);

        let columns = summarize_frame(frame, None)?;
        recorder.progress(55);

        let options = CorrelationOptions {
            top_n: Some(TOP_CORRELATIONS),
            with_insights: true,
            ..Default::default()
        };
        let correlations: Vec<CorrelationReport> = metadata
            .numeric_columns
            .iter()
            .take(MAX_CORRELATION_TARGETS)
            .map(|target| correlation::correlate(frame, target, &metadata.numeric_columns, &options))
            .collect();
        recorder.progress(65);

        let chart_options = DownsampleOptions::default().with_max_points(self.service.config().max_chart_points);
        let charts = default_charts(frame, &metadata, &correlations, &chart_options)?;
        recorder.progress(75);

        Ok(Analysis {
            metadata,
            columns,
            correlations,
            charts,
        })
    }

    async fn suggest(
        &self,
        recorder: &JobRecorder,
        metadata: &DatasetMetadata,
        correlations: &[CorrelationReport],
    ) -> Option<Vec<String>> {
        let generator = self.collaborators.suggestions.as_ref()?;
        match generator.suggest(metadata, correlations).await {
            Ok(suggestions) => Some(suggestions),
            Err(e) => {
                let err = TabulaError::optional("suggestions", e);
                warn!(job_id = %recorder.id(), error = %err, "Continuing without suggestions");
                None
            }
        }
    }

    async fn index(&self, recorder: &JobRecorder, input: &JobInput, metadata: &DatasetMetadata) -> Option<usize> {
        let indexer = self.collaborators.indexer.as_ref()?;
        match indexer.index(input.dataset(), metadata).await {
            Ok(documents) => Some(documents),
            Err(e) => {
                let err = TabulaError::optional("semantic_index", e);
                warn!(job_id = %recorder.id(), error = %err, "Continuing without semantic index");
                None
            }
        }
    }
}

/// Map `done / total` onto the `[from, to]` progress band.
fn band(from: u8, to: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return to;
    }
    let share = done.min(total) as f64 / total as f64;
    from + ((to - from) as f64 * share).round() as u8
}
