pub mod cache;
pub mod charts;
pub mod config;
pub mod correlation;
pub mod dataops;
pub mod error;
pub mod ingestion;
pub mod jobs;
pub mod service;
pub mod stats;
pub mod store;
pub mod value;

pub use config::EngineConfig;
pub use error::{Result, TabulaError};
pub use jobs::{JobScheduler, JobStatus, JobView, QueueStats};
pub use service::AnalysisService;
pub use value::Scalar;
