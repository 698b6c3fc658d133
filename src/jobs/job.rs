//! Ingestion job records and their one-way state machine.

use crate::charts::ChartSpec;
use crate::correlation::CorrelationReport;
use crate::dataops::ColumnSummary;
use crate::error::{Result, TabulaError};
use crate::store::DatasetMetadata;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

pub type JobId = Uuid;
pub(crate) type JobTable = Arc<DashMap<JobId, IngestionJob>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Uploading,
    Parsing,
    Analyzing,
    Saving,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Uploading => 1,
            JobStatus::Parsing => 2,
            JobStatus::Analyzing => 3,
            JobStatus::Saving => 4,
            JobStatus::Completed | JobStatus::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Holding a worker slot.
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != JobStatus::Pending
    }

    /// Stages only move forward; any non-terminal state may fail.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == JobStatus::Failed || next.rank() > self.rank()
    }
}

/// Summary of the dataset a job loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub metadata: DatasetMetadata,
    pub columns: Vec<ColumnSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub summary: DatasetSummary,
    pub charts: Vec<ChartSpec>,
    pub correlations: Vec<CorrelationReport>,
    /// Absent when no generator is configured or generation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    /// Documents handed to the semantic index, when indexing ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_documents: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct IngestionJob {
    pub id: JobId,
    pub session_id: String,
    pub owner: String,
    pub file_name: String,
    pub mime: String,
    pub payload_bytes: usize,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Monotonic time of reaching a terminal state; drives retention.
    pub(crate) finished: Option<Instant>,
}

impl IngestionJob {
    pub fn new(session_id: &str, owner: &str, file_name: &str, mime: &str, payload_bytes: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            owner: owner.to_string(),
            file_name: file_name.to_string(),
            mime: mime.to_string(),
            payload_bytes,
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            finished: None,
        }
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.id,
            session_id: self.session_id.clone(),
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
            result: if self.status == JobStatus::Completed {
                self.result.clone()
            } else {
                None
            },
        }
    }
}

/// Pollable snapshot of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub session_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

/// The only writer of one job's record.
#[derive(Clone)]
pub struct JobRecorder {
    jobs: JobTable,
    id: JobId,
}

impl JobRecorder {
    pub(crate) fn new(jobs: JobTable, id: JobId) -> Self {
        Self { jobs, id }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Move to `status` and raise progress to at least `progress`.
    pub fn advance(&self, status: JobStatus, progress: u8) -> Result<()> {
        self.update(|job| {
            if job.status != status {
                if !job.status.can_transition_to(status) || status.is_terminal() {
                    return Err(TabulaError::Internal(format!(
                        "invalid job transition {:?} -> {:?}",
                        job.status, status
                    )));
                }
                if job.status == JobStatus::Pending {
                    job.started_at = Some(Utc::now());
                }
                debug!(job_id = %job.id, from = ?job.status, to = ?status, "Job stage change");
                job.status = status;
            }
            job.progress = job.progress.max(progress.min(100));
            Ok(())
        })
    }

    /// Raise progress within the current stage. Lower values are ignored.
    pub fn progress(&self, progress: u8) {
        let _ = self.update(|job| {
            if !job.status.is_terminal() {
                job.progress = job.progress.max(progress.min(100));
            }
            Ok(())
        });
    }

    pub fn complete(&self, result: JobResult) -> Result<()> {
        self.update(|job| {
            if !job.status.can_transition_to(JobStatus::Completed) {
                return Err(TabulaError::Internal(format!("cannot complete job in state {:?}", job.status)));
            }
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
            job.finished = Some(Instant::now());
            Ok(())
        })
    }

    /// Record a failure verbatim. Already-terminal jobs are left alone.
    pub fn fail(&self, message: String) {
        let _ = self.update(|job| {
            if job.status.is_terminal() {
                return Ok(());
            }
            job.status = JobStatus::Failed;
            job.error = Some(message);
            job.result = None;
            job.completed_at = Some(Utc::now());
            job.finished = Some(Instant::now());
            Ok(())
        });
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.jobs.get(&self.id).map(|job| job.status)
    }

    fn update(&self, f: impl FnOnce(&mut IngestionJob) -> Result<()>) -> Result<()> {
        let mut job = self
            .jobs
            .get_mut(&self.id)
            .ok_or_else(|| TabulaError::NotFound(format!("job {}", self.id)))?;
        f(job.value_mut())
    }
}
