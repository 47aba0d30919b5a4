//! The guarded, persisted per-URL feed state map.
//!
//! A cheap-to-clone handle wrapping shared state, the way the teacher's
//! `Database` wraps a pool — reads return deep clones so predicate/render
//! work downstream is lock-free, and the only write primitive is
//! [`FeedSet::update`], which commits through the [`Store`] exactly once per
//! successful mutation.

mod ops;

use crate::model::FeedState;
use crate::store::{Store, StoreError};
use chrono::Utc;
use std::collections::{HashSet, BTreeMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum FeedSetError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct FeedSet {
    inner: Arc<Mutex<BTreeMap<String, FeedState>>>,
    store: Arc<dyn Store>,
}

impl FeedSet {
    pub fn new(store: Arc<dyn Store>, initial: BTreeMap<String, FeedState>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
            store,
        }
    }

    /// Deep clone of one feed's state, if it exists.
    pub async fn read(&self, url: &str) -> Option<FeedState> {
        self.inner.lock().await.get(url).cloned()
    }

    /// Deep clone of the whole map, sorted by URL (persisted JSON is always
    /// a full, sorted snapshot).
    pub async fn snapshot(&self) -> BTreeMap<String, FeedState> {
        self.inner.lock().await.clone()
    }

    /// Apply `f` to the feed at `url`. If the entry does not exist, `f`
    /// observes a freshly constructed [`FeedState`] with `last_updated =
    /// now` (not yet inserted). `f` returns `(changed, result)`; the mutation
    /// is committed — replacing the map entry and persisting a snapshot
    /// through the Store — only when `changed` is `true`. Any error from
    /// `f` discards the mutation entirely: the map is left as it was.
    pub async fn update<F, T, E>(&self, url: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut FeedState, bool) -> (bool, Result<T, E>),
        E: From<FeedSetError>,
    {
        let mut guard = self.inner.lock().await;
        let exists = guard.contains_key(url);
        let mut working = guard
            .get(url)
            .cloned()
            .unwrap_or_else(|| FeedState {
                last_updated: Utc::now(),
                ..Default::default()
            });

        let (changed, result) = f(&mut working, exists);

        match &result {
            Ok(_) if changed => {
                guard.insert(url.to_string(), working);
                let snapshot = guard.clone();
                drop(guard);
                self.store
                    .save_state(&snapshot)
                    .await
                    .map_err(FeedSetError::from)?;
            }
            _ => {
                // Unchanged, or `f` failed: discard the working copy.
            }
        }

        result
    }

    /// Deletes feeds whose URL is not in `keep`; persists iff any removal
    /// occurred.
    pub async fn prune_missing(&self, keep: &HashSet<String>) -> Result<usize, FeedSetError> {
        let mut guard = self.inner.lock().await;
        let before = guard.len();
        guard.retain(|url, _| keep.contains(url));
        let removed = before - guard.len();
        if removed > 0 {
            let snapshot = guard.clone();
            drop(guard);
            self.store.save_state(&snapshot).await?;
        }
        Ok(removed)
    }
}
