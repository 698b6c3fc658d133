//! Ingestion jobs: records, the bounded scheduler and the per-job pipeline.

pub mod collaborators;
pub mod job;
pub mod pipeline;
pub mod scheduler;

pub use collaborators::{
    Collaborators, DatasetRef, DatasetSink, HeuristicSuggestions, NoopSink, SemanticIndexer, SuggestionGenerator,
};
pub use job::{DatasetSummary, IngestionJob, JobId, JobRecorder, JobResult, JobStatus, JobView, QueueStats};
pub use pipeline::{JobInput, Pipeline};
pub use scheduler::JobScheduler;
