use std::sync::Arc;
use std::time::Duration;
use tabula::dataops::{ConversionTarget, NullMethod};
use tabula::store::ColumnKind;
use tabula::{AnalysisService, JobScheduler, JobStatus, Scalar, TabulaError};

async fn ingest(csv: &str) -> Arc<AnalysisService> {
    let service = Arc::new(AnalysisService::default());
    let scheduler = JobScheduler::new(service.clone());
    let id = scheduler
        .enqueue("s1", "owner", "upload.csv", csv.as_bytes().to_vec(), "text/csv")
        .unwrap();
    loop {
        let view = scheduler.get_status(&id).unwrap();
        if view.status.is_terminal() {
            assert_eq!(view.status, JobStatus::Completed, "{:?}", view.error);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    service
}

const CSV: &str = "city,rate,score\n\
Oslo,45%,10\n\
Rome,,20\n\
Lima,80,\n\
Oslo,15,40\n";

#[tokio::test]
async fn test_preview_and_summary() {
    let service = ingest(CSV).await;

    let preview = service.preview("s1", 2).unwrap();
    assert_eq!(preview.total_rows, 4);
    assert_eq!(preview.returned_rows, 2);
    assert_eq!(preview.rows[0]["city"], Scalar::Text("Oslo".to_string()));

    let summary = service.summarize("s1", Some("score")).unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].null_values, 1);
    assert_eq!(summary[0].max, Some(40.0));
    assert!(service.summarize("s1", Some("missing")).unwrap().is_empty());
}

#[tokio::test]
async fn test_null_handling_invalidates_cached_results() {
    let service = ingest(CSV).await;
    let before = service
        .run_read_only_query("s1", "SELECT COUNT(*) AS n FROM dataset WHERE score IS NULL")
        .unwrap();
    assert_eq!(before.rows[0]["n"], Scalar::Number(1.0));

    let report = service.remove_nulls("s1", Some("score"), &NullMethod::Mean).unwrap();
    assert_eq!(report.nulls_handled, 1);
    assert_eq!(report.rows_after, 4);

    let after = service
        .run_read_only_query("s1", "SELECT COUNT(*) AS n FROM dataset WHERE score IS NULL")
        .unwrap();
    assert_eq!(after.rows[0]["n"], Scalar::Number(0.0));
}

#[tokio::test]
async fn test_percentage_conversion() {
    let service = ingest(CSV).await;
    let info = service.convert_type("s1", "rate", ConversionTarget::Percentage).unwrap();
    assert_eq!(info.failed_conversions, 0);
    assert_eq!(info.converted_type, "f64");

    let stats = service.get_numeric_stats("s1", &["rate".to_string()]).unwrap();
    assert_eq!(stats[0].count, 3);
    assert_eq!(stats[0].max, Some(0.8));

    let metadata = service.get_metadata("s1").unwrap();
    assert_eq!(metadata.column("rate").unwrap().kind, ColumnKind::Number);

    assert!(matches!(
        service.convert_type("s1", "nope", ConversionTarget::Numeric),
        Err(TabulaError::Validation(_))
    ));
}
