//! Seams to services outside the engine: dataset persistence, suggestion
//! generation and semantic indexing.
//!
//! Only the sink is required for a job to complete. The other two are
//! best-effort; their failures are logged and the job carries on.

use crate::correlation::CorrelationReport;
use crate::error::Result;
use crate::jobs::job::DatasetSummary;
use crate::store::{ColumnKind, DatasetMetadata};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Identifies what a job is saving.
#[derive(Debug, Clone)]
pub struct DatasetRef<'a> {
    pub session_id: &'a str,
    pub owner: &'a str,
    pub file_name: &'a str,
}

#[async_trait]
pub trait DatasetSink: Send + Sync {
    async fn save(&self, dataset: DatasetRef<'_>, summary: &DatasetSummary) -> Result<()>;
}

#[async_trait]
pub trait SuggestionGenerator: Send + Sync {
    async fn suggest(&self, metadata: &DatasetMetadata, correlations: &[CorrelationReport]) -> Result<Vec<String>>;
}

#[async_trait]
pub trait SemanticIndexer: Send + Sync {
    /// Index the dataset description; returns the number of documents written.
    async fn index(&self, dataset: DatasetRef<'_>, metadata: &DatasetMetadata) -> Result<usize>;
}

/// The collaborators a scheduler hands to every job.
#[derive(Clone)]
pub struct Collaborators {
    pub sink: Arc<dyn DatasetSink>,
    pub suggestions: Option<Arc<dyn SuggestionGenerator>>,
    pub indexer: Option<Arc<dyn SemanticIndexer>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            sink: Arc::new(NoopSink),
            suggestions: Some(Arc::new(HeuristicSuggestions::default())),
            indexer: None,
        }
    }
}

impl Collaborators {
    pub fn with_sink(mut self, sink: impl DatasetSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn with_suggestions(mut self, generator: impl SuggestionGenerator + 'static) -> Self {
        self.suggestions = Some(Arc::new(generator));
        self
    }

    pub fn without_suggestions(mut self) -> Self {
        self.suggestions = None;
        self
    }

    pub fn with_indexer(mut self, indexer: impl SemanticIndexer + 'static) -> Self {
        self.indexer = Some(Arc::new(indexer));
        self
    }
}

/// Sink that keeps nothing beyond the in-process registry.
pub struct NoopSink;

#[async_trait]
impl DatasetSink for NoopSink {
    async fn save(&self, dataset: DatasetRef<'_>, summary: &DatasetSummary) -> Result<()> {
        debug!(
            session_id = dataset.session_id,
            rows = summary.metadata.row_count,
            "Dataset kept in memory only"
        );
        Ok(())
    }
}

/// Questions derived from column kinds and the strongest correlations.
pub struct HeuristicSuggestions {
    pub max_suggestions: usize,
}

impl Default for HeuristicSuggestions {
    fn default() -> Self {
        Self { max_suggestions: 5 }
    }
}

#[async_trait]
impl SuggestionGenerator for HeuristicSuggestions {
    async fn suggest(&self, metadata: &DatasetMetadata, correlations: &[CorrelationReport]) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for report in correlations {
            if let Some(top) = report.results.first() {
                let direction = if top.coefficient < 0.0 { "decrease" } else { "increase" };
                out.push(format!(
                    "Why does {} {} as {} rises (r = {:.2})?",
                    report.target, direction, top.column, top.coefficient
                ));
            }
        }
        if let (Some(date), Some(num)) = (metadata.date_columns.first(), metadata.numeric_columns.first()) {
            out.push(format!("How has {} changed over {}?", num, date));
        }
        if let Some(category) = metadata.columns.iter().find(|c| c.kind == ColumnKind::String) {
            if let Some(num) = metadata.numeric_columns.first() {
                out.push(format!("Which {} has the highest average {}?", category.name, num));
            }
        }
        out.truncate(self.max_suggestions);
        Ok(out)
    }
}
