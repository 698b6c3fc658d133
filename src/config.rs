//! Engine configuration
//!
//! All tunables live in one explicit struct handed to constructors, so tests can
//! build isolated instances with their own limits.

use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 3;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_MAX_CHART_POINTS: usize = 5_000;
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_QUERY_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Jobs allowed in an active (non-pending, non-terminal) state at once.
    pub max_concurrent_jobs: usize,
    /// Pending + active jobs accepted before `enqueue` rejects.
    pub max_queue_size: usize,
    /// Rows per ingestion batch.
    pub chunk_size: usize,
    /// Terminal jobs older than this are swept.
    pub job_retention: Duration,
    pub sweep_interval: Duration,
    pub metadata_ttl: Duration,
    /// TTL for query and correlation results.
    pub query_ttl: Duration,
    pub max_chart_points: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            job_retention: DEFAULT_JOB_RETENTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            metadata_ttl: DEFAULT_METADATA_TTL,
            query_ttl: DEFAULT_QUERY_TTL,
            max_chart_points: DEFAULT_MAX_CHART_POINTS,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TABULA_MAX_CONCURRENT_JOBS` | `3` | Max active ingestion jobs |
    /// | `TABULA_MAX_QUEUE_SIZE` | `100` | Max pending + active jobs |
    /// | `TABULA_CHUNK_SIZE` | `10000` | Rows per ingestion batch |
    /// | `TABULA_JOB_RETENTION_SECS` | `3600` | Terminal job retention |
    /// | `TABULA_SWEEP_INTERVAL_SECS` | `300` | Sweep period |
    /// | `TABULA_METADATA_TTL_SECS` | `86400` | Metadata cache TTL |
    /// | `TABULA_QUERY_TTL_SECS` | `3600` | Query/correlation cache TTL |
    /// | `TABULA_MAX_CHART_POINTS` | `5000` | Point budget per chart series |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("TABULA_MAX_CONCURRENT_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs)
                .max(1),
            max_queue_size: env_parse("TABULA_MAX_QUEUE_SIZE")
                .unwrap_or(defaults.max_queue_size)
                .max(1),
            chunk_size: env_parse("TABULA_CHUNK_SIZE")
                .unwrap_or(defaults.chunk_size)
                .max(1),
            job_retention: env_secs("TABULA_JOB_RETENTION_SECS").unwrap_or(defaults.job_retention),
            sweep_interval: env_secs("TABULA_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval)
                .max(MIN_SWEEP_INTERVAL),
            metadata_ttl: env_secs("TABULA_METADATA_TTL_SECS").unwrap_or(defaults.metadata_ttl),
            query_ttl: env_secs("TABULA_QUERY_TTL_SECS").unwrap_or(defaults.query_ttl),
            max_chart_points: env_parse("TABULA_MAX_CHART_POINTS")
                .unwrap_or(defaults.max_chart_points)
                .max(1),
        }
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max.max(1);
        self
    }

    pub fn with_chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = rows.max(1);
        self
    }

    pub fn with_job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    pub fn with_max_chart_points(mut self, points: usize) -> Self {
        self.max_chart_points = points.max(1);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
