//! Optimistic transaction protocol over a [`TransactionalStore`].
//!
//! Watch first, read, decide, then queue writes and commit. If any watched
//! key changed in between, nothing is written and the outcome is
//! [`CommitOutcome::Aborted`]. An abort is not an error: the next caller's
//! miss path picks up the newer state. This is not a lock; concurrent
//! misses may each render.

use mapstyle_core::{CacheEntry, StoreError, StyleResult};

use super::traits::{CommitOutcome, TransactionalStore, Watch, WriteOp};

/// Collects watches and writes for one conditional commit.
#[derive(Debug)]
pub struct ConsistencyGuard<'c, S: ?Sized> {
    store: &'c S,
    watches: Vec<Watch>,
    ops: Vec<WriteOp>,
}

impl<'c, S: TransactionalStore + ?Sized> ConsistencyGuard<'c, S> {
    pub fn new(store: &'c S) -> Self {
        Self {
            store,
            watches: Vec::new(),
            ops: Vec::new(),
        }
    }

    /// Watch `key`. Must happen before the reads the commit depends on.
    pub async fn watch(&mut self, key: &str) -> StyleResult<()> {
        let watch = self.store.watch(key).await?;
        self.watches.push(watch);
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        !self.watches.is_empty()
    }

    /// Queue a write of `entry` under `key`.
    pub fn set_entry(&mut self, key: &str, entry: &CacheEntry) -> StyleResult<()> {
        let value = entry.to_json().map_err(|e| StoreError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.ops.push(WriteOp::Set {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    pub fn del(&mut self, key: &str) {
        self.ops.push(WriteOp::Del {
            key: key.to_string(),
        });
    }

    /// Queue deletion of every key under `prefix`, enumerated at commit.
    pub fn del_prefix(&mut self, prefix: &str) {
        self.ops.push(WriteOp::DelPrefix {
            prefix: prefix.to_string(),
        });
    }

    /// Apply the queued writes if no watched key changed.
    pub async fn commit(self) -> StyleResult<CommitOutcome> {
        let outcome = self.store.commit(&self.watches, self.ops).await?;
        if outcome == CommitOutcome::Aborted {
            let keys: Vec<&str> = self.watches.iter().map(|w| w.key.as_str()).collect();
            tracing::debug!(watched = ?keys, "Watched key changed, commit aborted");
        }
        Ok(outcome)
    }
}

/// Read and parse the entry under `key`.
pub(crate) async fn read_entry<S: TransactionalStore + ?Sized>(
    store: &S,
    key: &str,
) -> StyleResult<Option<CacheEntry>> {
    match store.get(key).await? {
        None => Ok(None),
        Some(raw) => CacheEntry::from_json(&raw)
            .map(Some)
            .map_err(|e| {
                StoreError::Serialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
                .into()
            }),
    }
}
