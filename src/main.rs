use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabula::correlation::{CorrelationOptions, SignFilter};
use tabula::jobs::JobId;
use tabula::{AnalysisService, EngineConfig, JobScheduler, JobStatus, JobView};
use tracing::info;

#[derive(Parser)]
#[command(name = "tabula")]
#[command(about = "Bounded tabular ingestion and analysis")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Session the dataset is loaded under
    #[arg(long, default_value = "cli")]
    session: String,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a CSV/TSV file and print the job view as JSON
    Ingest { file: PathBuf },
    /// Ingest a file, then run a read-only SQL query against table `dataset`
    Query { file: PathBuf, sql: String },
    /// Ingest a file, then correlate every numeric column with `target`
    Correlate {
        file: PathBuf,
        target: String,
        #[arg(long)]
        top: Option<usize>,
        /// all, positive or negative
        #[arg(long, default_value = "all")]
        sign: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();

    let args = Args::parse();
    let config = EngineConfig::from_env();
    let service = Arc::new(AnalysisService::new(config));
    let scheduler = JobScheduler::new(service.clone());
    let _sweeper = scheduler.start_sweeper();

    match args.command {
        Command::Ingest { file } => {
            let view = ingest(&scheduler, &args.session, &file).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Query { file, sql } => {
            ingest(&scheduler, &args.session, &file).await?;
            let result = service.run_read_only_query(&args.session, &sql)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Correlate { file, target, top, sign } => {
            ingest(&scheduler, &args.session, &file).await?;
            let options = CorrelationOptions {
                sign: match sign.as_str() {
                    "all" => SignFilter::All,
                    "positive" => SignFilter::Positive,
                    "negative" => SignFilter::Negative,
                    other => bail!("unknown sign filter '{}'", other),
                },
                top_n: top,
                with_insights: true,
                ..Default::default()
            };
            let report = service.correlate_dataset(&args.session, &target, &[], &options)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn ingest(scheduler: &JobScheduler, session: &str, file: &Path) -> Result<JobView> {
    let payload = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("upload.csv")
        .to_string();

    let job_id = scheduler.enqueue(session, "cli", &file_name, payload, "application/octet-stream")?;
    info!(%job_id, file = %file.display(), "Submitted file");
    let view = wait_for(scheduler, job_id).await?;
    if view.status == JobStatus::Failed {
        bail!("ingestion failed: {}", view.error.unwrap_or_default());
    }
    Ok(view)
}

async fn wait_for(scheduler: &JobScheduler, job_id: JobId) -> Result<JobView> {
    let mut last_progress = None;
    loop {
        let view = scheduler
            .get_status(&job_id)
            .with_context(|| format!("job {} disappeared", job_id))?;
        if last_progress != Some(view.progress) {
            info!(status = ?view.status, progress = view.progress, "Job progress");
            last_progress = Some(view.progress);
        }
        if view.status.is_terminal() {
            return Ok(view);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
