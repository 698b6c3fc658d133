use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabula::correlation::CorrelationReport;
use tabula::jobs::{Collaborators, DatasetRef, DatasetSink, DatasetSummary, JobId, SuggestionGenerator};
use tabula::store::DatasetMetadata;
use tabula::{AnalysisService, EngineConfig, JobScheduler, JobStatus, JobView, TabulaError};
use tokio::sync::Semaphore;

/// Sink that blocks every save until the test hands out permits.
struct GatedSink {
    gate: Arc<Semaphore>,
    saved: Arc<AtomicUsize>,
}

#[async_trait]
impl DatasetSink for GatedSink {
    async fn save(&self, _dataset: DatasetRef<'_>, _summary: &DatasetSummary) -> tabula::Result<()> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| TabulaError::Internal(e.to_string()))?;
        self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct PanickingSink;

#[async_trait]
impl DatasetSink for PanickingSink {
    async fn save(&self, _dataset: DatasetRef<'_>, _summary: &DatasetSummary) -> tabula::Result<()> {
        panic!("storage backend crashed");
    }
}

struct BrokenSuggestions;

#[async_trait]
impl SuggestionGenerator for BrokenSuggestions {
    async fn suggest(&self, _: &DatasetMetadata, _: &[CorrelationReport]) -> tabula::Result<Vec<String>> {
        Err(TabulaError::Internal("model offline".to_string()))
    }
}

fn small_csv(seed: usize) -> Vec<u8> {
    let mut csv = String::from("a,b,label\n");
    for i in 0..50 {
        csv.push_str(&format!("{},{},{}\n", i + seed, (i * 2) % 7, if i % 2 == 0 { "x" } else { "y" }));
    }
    csv.into_bytes()
}

async fn wait_terminal(scheduler: &JobScheduler, id: JobId) -> JobView {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let view = scheduler.get_status(&id).expect("job exists");
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job finished in time")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_caps_active_jobs() {
    let max = 3;
    let config = EngineConfig::default().with_max_concurrent_jobs(max);
    let gate = Arc::new(Semaphore::new(0));
    let saved = Arc::new(AtomicUsize::new(0));
    let collaborators = Collaborators::default().with_sink(GatedSink {
        gate: gate.clone(),
        saved: saved.clone(),
    });
    let scheduler = JobScheduler::with_collaborators(Arc::new(AnalysisService::new(config)), collaborators);

    let ids: Vec<JobId> = (0..max + 2)
        .map(|i| {
            scheduler
                .enqueue(&format!("session-{}", i), "owner", "data.csv", small_csv(i), "text/csv")
                .unwrap()
        })
        .collect();

    // All admitted jobs park in the sink; the rest must stay pending.
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let stats = scheduler.get_queue_stats();
            assert!(stats.active <= max, "active jobs exceeded limit: {:?}", stats);
            if stats.active == max && stats.pending == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("scheduler reached steady state");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = scheduler.get_queue_stats();
    assert_eq!(stats.active, max);
    assert_eq!(stats.pending, 2);
    assert_eq!(saved.load(Ordering::SeqCst), 0);

    gate.add_permits(1);
    for id in &ids {
        let view = wait_terminal(&scheduler, *id).await;
        assert_eq!(view.status, JobStatus::Completed, "{:?}", view.error);
        assert_eq!(view.progress, 100);
    }
    assert_eq!(saved.load(Ordering::SeqCst), max + 2);
    assert_eq!(scheduler.get_queue_stats().completed, max + 2);
}

#[tokio::test]
async fn test_optional_step_failure_does_not_fail_job() {
    let collaborators = Collaborators::default().with_suggestions(BrokenSuggestions);
    let scheduler = JobScheduler::with_collaborators(Arc::new(AnalysisService::default()), collaborators);

    let id = scheduler
        .enqueue("s1", "owner", "data.csv", small_csv(0), "text/csv")
        .unwrap();
    let view = wait_terminal(&scheduler, id).await;

    assert_eq!(view.status, JobStatus::Completed);
    let result = view.result.expect("completed job has a result");
    assert!(result.suggestions.is_none());
    assert_eq!(result.summary.metadata.row_count, 50);
}

#[tokio::test]
async fn test_default_suggestions_present() {
    let scheduler = JobScheduler::new(Arc::new(AnalysisService::default()));
    let id = scheduler
        .enqueue("s1", "owner", "data.tsv", b"x\ty\n1\t2\n2\t4\n3\t5\n".to_vec(), "text/tab-separated-values")
        .unwrap();
    let view = wait_terminal(&scheduler, id).await;
    let result = view.result.unwrap();
    assert!(result.suggestions.is_some());
    assert_eq!(result.summary.metadata.numeric_columns, vec!["x", "y"]);
}

#[tokio::test]
async fn test_failures_capture_message_and_keep_result_absent() {
    let scheduler = JobScheduler::new(Arc::new(AnalysisService::default()));
    let id = scheduler
        .enqueue("s1", "owner", "blank.csv", b"   \n\n".to_vec(), "text/csv")
        .unwrap();
    let view = wait_terminal(&scheduler, id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.as_deref(), Some("Ingestion failed: file is empty"));
    assert!(view.result.is_none());
    assert!(!scheduler.service().registry().contains("s1"));
}

#[tokio::test]
async fn test_queue_full_counts_unfinished_jobs() {
    let config = EngineConfig::default().with_max_queue_size(2);
    let scheduler = JobScheduler::new(Arc::new(AnalysisService::new(config)));

    let first = scheduler.enqueue("s1", "o", "a.csv", small_csv(0), "text/csv").unwrap();
    scheduler.enqueue("s2", "o", "b.csv", small_csv(1), "text/csv").unwrap();
    let third = scheduler.enqueue("s3", "o", "c.csv", small_csv(2), "text/csv");
    assert!(matches!(third, Err(TabulaError::QueueFull { max: 2 })));

    // Finished jobs free their queue slot.
    wait_terminal(&scheduler, first).await;
    assert!(scheduler.enqueue("s3", "o", "c.csv", small_csv(2), "text/csv").is_ok());
}

#[tokio::test]
async fn test_panicking_worker_fails_job_and_frees_slot() {
    let config = EngineConfig::default().with_max_concurrent_jobs(1);
    let collaborators = Collaborators::default().with_sink(PanickingSink);
    let scheduler = JobScheduler::with_collaborators(Arc::new(AnalysisService::new(config)), collaborators);

    let first = scheduler.enqueue("s1", "o", "a.csv", small_csv(0), "text/csv").unwrap();
    let second = scheduler.enqueue("s2", "o", "b.csv", small_csv(1), "text/csv").unwrap();

    for id in [first, second] {
        let view = wait_terminal(&scheduler, id).await;
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.error.unwrap().contains("worker aborted"));
        assert!(view.result.is_none());
    }
    assert_eq!(scheduler.get_queue_stats().failed, 2);
}
