//! Session → dataset registry
//!
//! Holds the committed dataset of every session. Callers never share a live
//! [`ColumnarStore`] across sessions: each `open` hands out a fresh store over
//! the session's snapshot, wrapped in a guard that closes it when dropped.

use crate::error::{Result, TabulaError};
use crate::store::ColumnarStore;
use dashmap::DashMap;
use polars::prelude::DataFrame;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
pub struct StoreRegistry {
    datasets: DashMap<String, DataFrame>,
    open_stores: Arc<AtomicUsize>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a fully loaded store the session's dataset, replacing any previous one.
    /// The store is closed afterwards.
    pub fn commit(&self, mut store: ColumnarStore) -> Result<usize> {
        let frame = store.take_frame().ok_or_else(|| {
            TabulaError::Store(format!("no dataset loaded for session {}", store.session_id()))
        })?;
        store.close();
        let rows = frame.height();
        let replaced = self
            .datasets
            .insert(store.session_id().to_string(), frame)
            .is_some();
        info!(session_id = %store.session_id(), rows, replaced, "Committed dataset");
        Ok(rows)
    }

    pub(crate) fn replace(&self, session_id: &str, frame: DataFrame) {
        self.datasets.insert(session_id.to_string(), frame);
    }

    /// Open the session's store for a scoped operation.
    pub fn open(&self, session_id: &str) -> Result<StoreGuard> {
        let frame = self
            .datasets
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TabulaError::NotFound(format!("no dataset for session {}", session_id)))?;
        self.open_stores.fetch_add(1, Ordering::SeqCst);
        Ok(StoreGuard {
            store: ColumnarStore::from_frame(session_id, frame),
            open_stores: self.open_stores.clone(),
        })
    }

    /// Run `f` against the session's store; the store is closed however `f` exits.
    pub fn with_store<T>(&self, session_id: &str, f: impl FnOnce(&ColumnarStore) -> Result<T>) -> Result<T> {
        let guard = self.open(session_id)?;
        f(&guard)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.datasets.contains_key(session_id)
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.datasets.remove(session_id).is_some()
    }

    /// Stores currently handed out and not yet closed.
    pub fn open_store_count(&self) -> usize {
        self.open_stores.load(Ordering::SeqCst)
    }
}

pub struct StoreGuard {
    store: ColumnarStore,
    open_stores: Arc<AtomicUsize>,
}

impl Deref for StoreGuard {
    type Target = ColumnarStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl DerefMut for StoreGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.store
    }
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        self.store.close();
        self.open_stores.fetch_sub(1, Ordering::SeqCst);
    }
}
