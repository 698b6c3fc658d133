//! Analysis surface over committed session datasets.
//!
//! Ties the [`StoreRegistry`] to the metadata, query and correlation caches.
//! Every read goes through a scoped store that is closed before the call
//! returns; anything that replaces a session's dataset invalidates that
//! session's cache entries.

use crate::cache::{cache_key, ResultCache};
use crate::config::EngineConfig;
use crate::correlation::{self, CorrelationOptions, CorrelationReport, CorrelationResult, NumericColumns};
use crate::error::Result;
use crate::store::query_guard::ensure_read_only;
use crate::store::{ColumnarStore, DatasetMetadata, NumericStats, QueryResult, StoreRegistry};
use crate::value::Record;
use polars::prelude::DataFrame;
use tracing::{debug, info};

const METADATA_FINGERPRINT: &str = "metadata";

pub struct AnalysisService {
    config: EngineConfig,
    registry: StoreRegistry,
    metadata_cache: ResultCache<DatasetMetadata>,
    query_cache: ResultCache<QueryResult>,
    correlation_cache: ResultCache<Vec<CorrelationResult>>,
}

impl AnalysisService {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            metadata_cache: ResultCache::new("metadata", config.metadata_ttl),
            query_cache: ResultCache::new("query", config.query_ttl),
            correlation_cache: ResultCache::new("correlation", config.query_ttl),
            registry: StoreRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    /// Make a loaded store the session's dataset. Cached results for the
    /// session are dropped first.
    pub fn commit_dataset(&self, store: ColumnarStore) -> Result<usize> {
        let session_id = store.session_id().to_string();
        self.invalidate_session(&session_id);
        self.registry.commit(store)
    }

    /// Swap the session's dataset for a transformed frame.
    pub(crate) fn replace_dataset(&self, session_id: &str, frame: DataFrame) {
        self.invalidate_session(session_id);
        self.registry.replace(session_id, frame);
    }

    pub fn get_metadata(&self, session_id: &str) -> Result<DatasetMetadata> {
        let key = cache_key::<&str>(session_id, METADATA_FINGERPRINT, &[]);
        if let Some(metadata) = self.metadata_cache.get(&key) {
            return Ok(metadata);
        }
        let metadata = self.registry.with_store(session_id, |store| store.compute_metadata())?;
        self.metadata_cache.set(key, metadata.clone());
        Ok(metadata)
    }

    /// Seed the metadata cache with a value computed elsewhere (ingestion).
    pub fn cache_metadata(&self, session_id: &str, metadata: DatasetMetadata) {
        let key = cache_key::<&str>(session_id, METADATA_FINGERPRINT, &[]);
        self.metadata_cache.set(key, metadata);
    }

    pub fn sample(&self, session_id: &str, limit: usize) -> Result<Vec<Record>> {
        self.registry.with_store(session_id, |store| store.sample_rows(limit))
    }

    /// Run a read-only query against the session dataset. Rejected statements
    /// never reach the cache or the engine.
    pub fn run_read_only_query(&self, session_id: &str, sql: &str) -> Result<QueryResult> {
        ensure_read_only(sql)?;
        let key = cache_key::<&str>(session_id, &format!("query:{}", sql), &[]);
        if let Some(result) = self.query_cache.get(&key) {
            return Ok(result);
        }
        let result = self
            .registry
            .with_store(session_id, |store| store.execute_read_only_query(sql))?;
        self.query_cache.set(key, result.clone());
        Ok(result)
    }

    pub fn get_numeric_stats(&self, session_id: &str, columns: &[String]) -> Result<Vec<NumericStats>> {
        self.registry
            .with_store(session_id, |store| store.numeric_stats(columns))
    }

    /// Correlate caller-supplied rows. The unfiltered ranking is cached per
    /// `(session, target, candidates)`; options are applied on every call.
    pub fn correlate<D: NumericColumns + ?Sized>(
        &self,
        session_id: &str,
        data: &D,
        target: &str,
        candidates: &[String],
        options: &CorrelationOptions,
    ) -> CorrelationReport {
        let key = cache_key(session_id, &format!("correlation:{}", target), candidates);
        let ranked = match self.correlation_cache.get(&key) {
            Some(ranked) => ranked,
            None => {
                let ranked = correlation::compute_correlations(data, target, candidates);
                self.correlation_cache.set(key, ranked.clone());
                ranked
            }
        };
        correlation::finalize(data, target, ranked, options)
    }

    /// Correlate against the committed dataset. An empty candidate list means
    /// every numeric column.
    pub fn correlate_dataset(
        &self,
        session_id: &str,
        target: &str,
        candidates: &[String],
        options: &CorrelationOptions,
    ) -> Result<CorrelationReport> {
        let candidates = if candidates.is_empty() {
            self.get_metadata(session_id)?.numeric_columns
        } else {
            candidates.to_vec()
        };
        self.registry.with_store(session_id, |store| {
            let frame = store.frame()?;
            Ok(self.correlate(session_id, frame, target, &candidates, options))
        })
    }

    /// Drop every cached result for the session.
    pub fn invalidate_session(&self, session_id: &str) -> usize {
        let removed = self.metadata_cache.invalidate_session(session_id)
            + self.query_cache.invalidate_session(session_id)
            + self.correlation_cache.invalidate_session(session_id);
        if removed > 0 {
            info!(session_id, removed, "Invalidated cached session results");
        }
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let purged = self.metadata_cache.purge_expired()
            + self.query_cache.purge_expired()
            + self.correlation_cache.purge_expired();
        debug!(purged, "Purged expired cache entries");
        purged
    }
}

impl Default for AnalysisService {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
