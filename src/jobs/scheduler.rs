//! Job Scheduler
//!
//! Accepts uploads, bounds the queue, and runs at most `max_concurrent_jobs`
//! pipelines at once. Every enqueued job gets its own task that waits on a
//! fair semaphore, so a finished job hands its slot straight to the oldest
//! waiting one.

use crate::config::{EngineConfig, MIN_SWEEP_INTERVAL};
use crate::error::{Result, TabulaError};
use crate::ingestion::detect_delimiter;
use crate::jobs::collaborators::Collaborators;
use crate::jobs::job::{IngestionJob, JobId, JobRecorder, JobStatus, JobTable, JobView, QueueStats};
use crate::jobs::pipeline::{JobInput, Pipeline};
use crate::service::AnalysisService;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: EngineConfig,
    jobs: JobTable,
    permits: Arc<Semaphore>,
    pipeline: Pipeline,
    /// Serializes the queue-size check with the insert.
    admission: Mutex<()>,
}

impl JobScheduler {
    pub fn new(service: Arc<AnalysisService>) -> Self {
        Self::with_collaborators(service, Collaborators::default())
    }

    pub fn with_collaborators(service: Arc<AnalysisService>, collaborators: Collaborators) -> Self {
        let config = service.config().clone();
        info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            max_queue_size = config.max_queue_size,
            chunk_size = config.chunk_size,
            "Job scheduler initialized"
        );
        Self {
            inner: Arc::new(SchedulerInner {
                permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                jobs: Arc::new(DashMap::new()),
                pipeline: Pipeline::new(service, collaborators),
                admission: Mutex::new(()),
                config,
            }),
        }
    }

    pub fn service(&self) -> &Arc<AnalysisService> {
        self.inner.pipeline.service()
    }

    /// Validate and queue an upload. Must be called from within a Tokio runtime.
    ///
    /// Fails without creating a job when the payload is empty, the file kind is
    /// unsupported, or the queue already holds `max_queue_size` unfinished jobs.
    pub fn enqueue(
        &self,
        session_id: &str,
        owner: &str,
        file_name: &str,
        payload: Vec<u8>,
        mime: &str,
    ) -> Result<JobId> {
        if payload.is_empty() {
            return Err(TabulaError::Validation("file is empty".to_string()));
        }
        let delimiter = detect_delimiter(mime, file_name).ok_or_else(|| {
            TabulaError::Validation(format!("unsupported file type '{}' for {}", mime, file_name))
        })?;

        let job = IngestionJob::new(session_id, owner, file_name, mime, payload.len());
        let job_id = job.id;
        {
            let _admission = self.inner.admission.lock().unwrap_or_else(PoisonError::into_inner);
            let queued = self
                .inner
                .jobs
                .iter()
                .filter(|entry| !entry.status.is_terminal())
                .count();
            if queued >= self.inner.config.max_queue_size {
                warn!(queued, max = self.inner.config.max_queue_size, "Job queue full; rejecting upload");
                return Err(TabulaError::QueueFull {
                    max: self.inner.config.max_queue_size,
                });
            }
            self.inner.jobs.insert(job_id, job);
        }

        info!(
            job_id = %job_id,
            session_id,
            file_name,
            bytes = payload.len(),
            "Enqueued ingestion job"
        );

        let input = JobInput {
            session_id: session_id.to_string(),
            owner: owner.to_string(),
            file_name: file_name.to_string(),
            payload,
            delimiter,
        };
        let inner = self.inner.clone();
        let recorder = JobRecorder::new(inner.jobs.clone(), job_id);
        tokio::spawn(async move {
            let _permit = match inner.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Worker slots closed");
                    recorder.fail(format!("scheduler unavailable: {}", e));
                    return;
                }
            };
            debug!(job_id = %job_id, "Job admitted");
            let worker = {
                let inner = inner.clone();
                let recorder = recorder.clone();
                tokio::spawn(async move { inner.pipeline.run(&recorder, input).await })
            };
            if let Err(e) = worker.await {
                error!(job_id = %job_id, error = %e, "Ingestion worker aborted");
                recorder.fail(format!("Internal error: ingestion worker aborted: {}", e));
            }
        });

        Ok(job_id)
    }

    pub fn get_status(&self, job_id: &JobId) -> Option<JobView> {
        self.inner.jobs.get(job_id).map(|job| job.view())
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            max_concurrent: self.inner.config.max_concurrent_jobs,
            max_queue_size: self.inner.config.max_queue_size,
            ..Default::default()
        };
        for entry in self.inner.jobs.iter() {
            match entry.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                _ => stats.active += 1,
            }
        }
        stats.total = self.inner.jobs.len();
        stats
    }

    /// Remove terminal jobs older than the retention window and purge expired
    /// cache entries. Returns the number of jobs removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let retention = self.inner.config.job_retention;
        let before = self.inner.jobs.len();
        self.inner.jobs.retain(|_, job| match job.finished {
            Some(finished) => now.duration_since(finished) < retention,
            None => true,
        });
        let removed = before.saturating_sub(self.inner.jobs.len());
        let purged = self.service().purge_expired();
        if removed > 0 || purged > 0 {
            info!(removed, purged, "Swept expired jobs");
        }
        removed
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `sweep_interval` until
    /// the scheduler is dropped.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("Scheduler dropped; stopping sweeper");
                    break;
                };
                JobScheduler { inner }.sweep_expired();
            }
        })
    }
}
