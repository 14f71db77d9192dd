//! In-memory transactional store.
//!
//! Backed by a `BTreeMap` so prefix enumeration is a range scan. Stamps are
//! kept in a separate map that outlives deletes, so a watch placed on a key
//! notices it being deleted and recreated.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use mapstyle_core::{StoreError, StyleResult};

use super::traits::{CommitOutcome, TransactionalStore, Watch, WatchToken, WriteOp};

#[derive(Debug, Default)]
struct StoreState {
    entries: BTreeMap<String, String>,
    stamps: HashMap<String, u64>,
    sequence: u64,
}

impl StoreState {
    fn stamp(&self, key: &str) -> WatchToken {
        WatchToken::new(self.stamps.get(key).copied().unwrap_or(0))
    }

    fn touch(&mut self, key: &str) {
        self.sequence += 1;
        self.stamps.insert(key.to_string(), self.sequence);
    }

    fn put(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
        self.touch(key);
    }

    fn remove(&mut self, key: &str) -> bool {
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.touch(key);
        }
        existed
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Thread-safe in-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> StyleResult<usize> {
        Ok(self.read()?.entries.len())
    }

    pub fn is_empty(&self) -> StyleResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> StyleResult<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| StoreError::LockPoisoned.into())
    }

    fn write(&self) -> StyleResult<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| StoreError::LockPoisoned.into())
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    async fn get(&self, key: &str) -> StyleResult<Option<String>> {
        Ok(self.read()?.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StyleResult<()> {
        self.write()?.put(key, value);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StyleResult<u64> {
        let mut state = self.write()?;
        Ok(keys.iter().filter(|key| state.remove(key)).count() as u64)
    }

    async fn keys(&self, prefix: &str) -> StyleResult<Vec<String>> {
        Ok(self.read()?.keys_with_prefix(prefix))
    }

    async fn watch(&self, key: &str) -> StyleResult<Watch> {
        let token = self.read()?.stamp(key);
        Ok(Watch {
            key: key.to_string(),
            token,
        })
    }

    async fn commit(&self, watches: &[Watch], ops: Vec<WriteOp>) -> StyleResult<CommitOutcome> {
        let mut state = self.write()?;

        if watches.iter().any(|w| state.stamp(&w.key) != w.token) {
            return Ok(CommitOutcome::Aborted);
        }

        for op in ops {
            match op {
                WriteOp::Set { key, value } => state.put(&key, &value),
                WriteOp::Del { key } => {
                    state.remove(&key);
                }
                WriteOp::DelPrefix { prefix } => {
                    for key in state.keys_with_prefix(&prefix) {
                        state.remove(&key);
                    }
                }
            }
        }

        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = InMemoryStore::new();
        store.set("a", "1").await.expect("set should succeed");
        assert_eq!(store.get("a").await.expect("get"), Some("1".to_string()));

        let deleted = store
            .del(&["a".to_string(), "missing".to_string()])
            .await
            .expect("del should succeed");
        assert_eq!(deleted, 1);
        assert_eq!(store.get("a").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_keys_by_prefix_is_ordered_and_bounded() {
        let store = InMemoryStore::new();
        for key in ["p|b", "p|a", "p", "q|a", "p_x"] {
            store.set(key, "v").await.expect("set should succeed");
        }
        let keys = store.keys("p|").await.expect("keys should succeed");
        assert_eq!(keys, vec!["p|a".to_string(), "p|b".to_string()]);
    }

    #[tokio::test]
    async fn test_commit_aborts_when_watched_key_changes() {
        let store = InMemoryStore::new();
        let watch = store.watch("base").await.expect("watch should succeed");
        store.set("base", "changed").await.expect("set should succeed");

        let outcome = store
            .commit(
                &[watch],
                vec![WriteOp::Set {
                    key: "derived".to_string(),
                    value: "x".to_string(),
                }],
            )
            .await
            .expect("commit should succeed");

        assert_eq!(outcome, CommitOutcome::Aborted);
        assert_eq!(store.get("derived").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_delete_and_recreate_invalidates_watch() {
        let store = InMemoryStore::new();
        store.set("base", "v1").await.expect("set");
        let watch = store.watch("base").await.expect("watch");

        store.del(&["base".to_string()]).await.expect("del");
        store.set("base", "v1").await.expect("set");

        let outcome = store.commit(&[watch], vec![]).await.expect("commit");
        assert_eq!(outcome, CommitOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_commit_applies_prefix_delete_atomically() {
        let store = InMemoryStore::new();
        for key in ["b", "b|1", "b|2", "c|1"] {
            store.set(key, "v").await.expect("set");
        }
        let watch = store.watch("b").await.expect("watch");

        let outcome = store
            .commit(
                &[watch],
                vec![
                    WriteOp::Set {
                        key: "b".to_string(),
                        value: "new".to_string(),
                    },
                    WriteOp::DelPrefix {
                        prefix: "b|".to_string(),
                    },
                ],
            )
            .await
            .expect("commit");

        assert!(outcome.is_committed());
        assert_eq!(store.keys("b").await.expect("keys"), vec!["b".to_string()]);
        assert_eq!(store.len().expect("len"), 2);
    }
}
