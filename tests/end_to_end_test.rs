use std::sync::Arc;
use std::time::Duration;
use tabula::correlation::CorrelationOptions;
use tabula::{AnalysisService, EngineConfig, JobScheduler, JobStatus};

const ROWS: usize = 200_000;

/// Sales-like data: revenue tracks units, discount works against it, and a
/// few cells are blank or carry currency formatting.
fn build_csv(rows: usize) -> Vec<u8> {
    let start = chrono::NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    let regions = ["north", "south", "east", "west"];
    let mut csv = String::with_capacity(rows * 48);
    csv.push_str("date,region,units,price,revenue,discount\n");
    for i in 0..rows {
        let date = start + chrono::Duration::days((i % 900) as i64);
        let units = (i % 50) as f64 + 1.0;
        let price = 10.0 + (i % 7) as f64;
        let revenue = units * price;
        let discount = 60.0 - units;
        let revenue_cell = if i % 1000 == 0 {
            String::new()
        } else if i % 3 == 0 {
            format!("${:.2}", revenue)
        } else {
            format!("{:.2}", revenue)
        };
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            date.format("%Y-%m-%d"),
            regions[i % regions.len()],
            units,
            price,
            revenue_cell,
            discount
        ));
    }
    csv.into_bytes()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_upload_end_to_end() {
    let service = Arc::new(AnalysisService::new(EngineConfig::default()));
    let scheduler = JobScheduler::new(service.clone());

    let job_id = scheduler
        .enqueue("sales", "analyst", "sales.csv", build_csv(ROWS), "text/csv")
        .unwrap();

    let mut progress_seen = Vec::new();
    let view = tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let view = scheduler.get_status(&job_id).unwrap();
            progress_seen.push(view.progress);
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job finished in time");

    assert_eq!(view.status, JobStatus::Completed, "{:?}", view.error);
    assert!(progress_seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards");
    assert!(view.started_at.is_some() && view.completed_at.is_some());

    let result = view.result.expect("completed job carries a result");
    let metadata = &result.summary.metadata;
    assert_eq!(metadata.row_count, ROWS);
    assert_eq!(metadata.column_count, 6);
    assert_eq!(metadata.date_columns, vec!["date"]);
    assert_eq!(metadata.numeric_columns, vec!["units", "price", "revenue", "discount"]);

    let revenue = result
        .summary
        .columns
        .iter()
        .find(|c| c.variable == "revenue")
        .unwrap();
    assert_eq!(revenue.null_values, ROWS / 1000);

    assert!(!result.charts.is_empty());
    for chart in &result.charts {
        assert!(chart.points.len() <= 5_000, "{} has {} points", chart.title, chart.points.len());
    }

    assert!(!result.correlations.is_empty());
    for report in &result.correlations {
        let magnitudes: Vec<f64> = report.results.iter().map(|r| r.coefficient.abs()).collect();
        assert!(magnitudes.windows(2).all(|w| w[0] >= w[1]), "unsorted: {:?}", magnitudes);
    }

    let units = &result.correlations[0];
    assert_eq!(units.target, "units");
    let discount = units.results.iter().find(|r| r.column == "discount").unwrap();
    assert!((discount.coefficient + 1.0).abs() < 1e-9);
    assert_eq!(discount.n_pairs, ROWS);
    let revenue = units.results.iter().find(|r| r.column == "revenue").unwrap();
    assert_eq!(revenue.n_pairs, ROWS - ROWS / 1000);

    // The committed dataset serves later analysis calls.
    assert_eq!(service.get_metadata("sales").unwrap().row_count, ROWS);
    let query = service
        .run_read_only_query("sales", "SELECT region, COUNT(*) AS n FROM dataset GROUP BY region ORDER BY region")
        .unwrap();
    assert_eq!(query.row_count, 4);
    let report = service
        .correlate_dataset(
            "sales",
            "revenue",
            &[],
            &CorrelationOptions {
                top_n: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(service.registry().open_store_count(), 0);
}
