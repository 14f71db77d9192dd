//! LMDB-backed transactional store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! persistent key-value store that several style caches in one process can
//! share.
//!
//! # Layout
//!
//! Four named databases live in one environment:
//! - `entries`: stored key -> serialized cache entry
//! - `stamps`: stored key -> last-modified sequence (8 bytes, little endian)
//! - `long_keys`: stored key -> full cache key, for digested keys only
//! - `meta`: the store-wide sequence counter
//!
//! # Long Keys
//!
//! LMDB rejects keys over 511 bytes, and extended keys embed a whole row
//! filter or override style. A key up to [`MAX_INLINE_KEY`] bytes is stored
//! as is. A longer key is stored as its leading [`MAX_INLINE_KEY`] bytes
//! (cut at a char boundary), `#`, and the base64 SHA-256 of the full key.
//! Digested keys are always longer than [`MAX_INLINE_KEY`], so they never
//! collide with inline keys, and they keep the leading bytes that prefix
//! scans rely on.
//!
//! # Thread Safety
//!
//! LMDB serializes write transactions. `commit` checks every watch and
//! applies every op inside a single write transaction, which makes the
//! watch check and the writes one atomic step.

use std::borrow::Cow;
use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use mapstyle_core::{StoreError, StyleResult};
use sha2::{Digest, Sha256};

use super::traits::{CommitOutcome, TransactionalStore, Watch, WatchToken, WriteOp};

const SEQUENCE_KEY: &str = "sequence";

/// Longest cache key stored verbatim.
pub const MAX_INLINE_KEY: usize = 400;

/// Prefix scans match on at most this many leading bytes, which every
/// digested key keeps intact.
const SCAN_HEAD: usize = MAX_INLINE_KEY - 4;

/// Largest char boundary of `s` at or below `max`.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// The key under which `key` is stored in LMDB.
fn stored_key(key: &str) -> Cow<'_, str> {
    if key.len() <= MAX_INLINE_KEY {
        return Cow::Borrowed(key);
    }
    let head = &key[..floor_char_boundary(key, MAX_INLINE_KEY)];
    let digest = URL_SAFE_NO_PAD.encode(Sha256::digest(key.as_bytes()));
    Cow::Owned(format!("{}#{}", head, digest))
}

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stamp or counter had the wrong width.
    #[error("Corrupt stamp under {0}")]
    CorruptStamp(String),

    /// A digested key has no recorded full key.
    #[error("Missing full key for {0}")]
    MissingKey(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::EnvOpen(reason) | LmdbStoreError::DbOpen(reason) => {
                StoreError::Connection { reason }
            }
            LmdbStoreError::Io(io) => StoreError::Connection {
                reason: io.to_string(),
            },
            other => StoreError::TransactionFailed {
                reason: other.to_string(),
            },
        }
    }
}

impl From<LmdbStoreError> for mapstyle_core::StyleError {
    fn from(e: LmdbStoreError) -> Self {
        StoreError::from(e).into()
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// LMDB-backed [`TransactionalStore`].
///
/// # Example
///
/// ```ignore
/// use mapstyle_storage::cache::{LmdbStore, StorePool};
///
/// let store = Arc::new(LmdbStore::new("/var/cache/mapstyle/lmdb", 64)?);
/// let pool = StorePool::new(store, 8);
/// ```
pub struct LmdbStore {
    env: Env,
    entries: Database<Str, Str>,
    stamps: Database<Str, Bytes>,
    long_keys: Database<Str, Str>,
    meta: Database<Str, Bytes>,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

impl LmdbStore {
    /// Open (or create) a store under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// environment or its databases cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(4)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let entries: Database<Str, Str> = env
            .create_database(&mut wtxn, Some("entries"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let stamps: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some("stamps"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let long_keys: Database<Str, Str> = env
            .create_database(&mut wtxn, Some("long_keys"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let meta: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some("meta"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            entries,
            stamps,
            long_keys,
            meta,
        })
    }

    fn read_u64(
        db: &Database<Str, Bytes>,
        txn: &RoTxn,
        key: &str,
    ) -> Result<u64, LmdbStoreError> {
        match db.get(txn, key).map_err(txn_err)? {
            None => Ok(0),
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| LmdbStoreError::CorruptStamp(key.to_string()))?;
                Ok(u64::from_le_bytes(raw))
            }
        }
    }

    /// Advance the sequence and stamp `stored` with it.
    fn touch(&self, wtxn: &mut RwTxn, stored: &str) -> Result<(), LmdbStoreError> {
        let next = Self::read_u64(&self.meta, wtxn, SEQUENCE_KEY)? + 1;
        let bytes = next.to_le_bytes();
        self.meta
            .put(wtxn, SEQUENCE_KEY, &bytes)
            .map_err(txn_err)?;
        self.stamps.put(wtxn, stored, &bytes).map_err(txn_err)?;
        Ok(())
    }

    fn put_entry(&self, wtxn: &mut RwTxn, key: &str, value: &str) -> Result<(), LmdbStoreError> {
        let stored = stored_key(key);
        if let Cow::Owned(digested) = &stored {
            self.long_keys.put(wtxn, digested, key).map_err(txn_err)?;
        }
        self.entries.put(wtxn, &stored, value).map_err(txn_err)?;
        self.touch(wtxn, &stored)
    }

    fn delete_entry(&self, wtxn: &mut RwTxn, key: &str) -> Result<bool, LmdbStoreError> {
        let stored = stored_key(key);
        let existed = self.entries.delete(wtxn, &stored).map_err(txn_err)?;
        if existed {
            if let Cow::Owned(digested) = &stored {
                self.long_keys.delete(wtxn, digested).map_err(txn_err)?;
            }
            self.touch(wtxn, &stored)?;
        }
        Ok(existed)
    }

    /// The full cache key for a key as stored.
    fn full_key(&self, txn: &RoTxn, stored: &str) -> Result<String, LmdbStoreError> {
        if stored.len() <= MAX_INLINE_KEY {
            return Ok(stored.to_string());
        }
        self.long_keys
            .get(txn, stored)
            .map_err(txn_err)?
            .map(str::to_string)
            .ok_or_else(|| LmdbStoreError::MissingKey(stored.to_string()))
    }

    /// Full keys starting with `prefix`, in key order.
    fn collect_keys_with_prefix(
        &self,
        txn: &RoTxn,
        prefix: &str,
    ) -> Result<Vec<String>, LmdbStoreError> {
        let head = &prefix[..floor_char_boundary(prefix, SCAN_HEAD)];
        let mut keys = Vec::new();
        for result in self.entries.prefix_iter(txn, head).map_err(txn_err)? {
            let (stored, _) = result.map_err(txn_err)?;
            let key = self.full_key(txn, stored)?;
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort_unstable();
        Ok(keys)
    }
}

#[async_trait]
impl TransactionalStore for LmdbStore {
    async fn get(&self, key: &str) -> StyleResult<Option<String>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let value = self
            .entries
            .get(&rtxn, &stored_key(key))
            .map_err(txn_err)?
            .map(str::to_string);
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> StyleResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.put_entry(&mut wtxn, key, value)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StyleResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.delete_entry(&mut wtxn, key)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn keys(&self, prefix: &str) -> StyleResult<Vec<String>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.collect_keys_with_prefix(&rtxn, prefix)?)
    }

    async fn watch(&self, key: &str) -> StyleResult<Watch> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let token = WatchToken::new(Self::read_u64(&self.stamps, &rtxn, &stored_key(key))?);
        Ok(Watch {
            key: key.to_string(),
            token,
        })
    }

    async fn commit(&self, watches: &[Watch], ops: Vec<WriteOp>) -> StyleResult<CommitOutcome> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        for watch in watches {
            let current =
                WatchToken::new(Self::read_u64(&self.stamps, &wtxn, &stored_key(&watch.key))?);
            if current != watch.token {
                // Dropping the transaction discards it.
                return Ok(CommitOutcome::Aborted);
            }
        }

        for op in ops {
            match op {
                WriteOp::Set { key, value } => self.put_entry(&mut wtxn, &key, &value)?,
                WriteOp::Del { key } => {
                    self.delete_entry(&mut wtxn, &key)?;
                }
                WriteOp::DelPrefix { prefix } => {
                    for key in self.collect_keys_with_prefix(&wtxn, &prefix)? {
                        self.delete_entry(&mut wtxn, &key)?;
                    }
                }
            }
        }

        wtxn.commit().map_err(txn_err)?;
        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _dir) = create_test_store();
        store.set("map_style|gis|roads", "{}").await.expect("set should succeed");
        let value = store.get("map_style|gis|roads").await.expect("get should succeed");
        assert_eq!(value.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _dir) = create_test_store();
        let value = store.get("missing").await.expect("get should succeed");
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_prefix_scan() {
        let (store, _dir) = create_test_store();
        for key in ["t", "t|a", "t|b", "tt|a"] {
            store.set(key, "v").await.expect("set should succeed");
        }
        let keys = store.keys("t|").await.expect("keys should succeed");
        assert_eq!(keys, vec!["t|a".to_string(), "t|b".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_watch_aborts() {
        let (store, _dir) = create_test_store();
        let watch = store.watch("t").await.expect("watch should succeed");
        assert_eq!(watch.token, WatchToken::untouched());

        store.set("t", "v").await.expect("set should succeed");
        let outcome = store
            .commit(
                &[watch],
                vec![WriteOp::Set {
                    key: "t|a".to_string(),
                    value: "x".to_string(),
                }],
            )
            .await
            .expect("commit should succeed");

        assert_eq!(outcome, CommitOutcome::Aborted);
        assert!(store.get("t|a").await.expect("get").is_none());
    }

    fn long_key(base: &str, fill: char, len: usize) -> String {
        let mut key = format!("{}|sql.", base);
        key.extend(std::iter::repeat(fill).take(len));
        key
    }

    #[test]
    fn test_stored_key_keeps_short_keys() {
        assert_eq!(stored_key("map_style|gis|roads"), "map_style|gis|roads");
    }

    #[test]
    fn test_stored_key_digests_long_keys() {
        let key = long_key("map_style|gis|roads", 'é', 300);
        let stored = stored_key(&key);
        assert!(stored.len() > MAX_INLINE_KEY);
        assert!(stored.len() <= 511);
        assert!(stored.starts_with("map_style|gis|roads|sql."));
        assert_ne!(stored_key(&long_key("map_style|gis|roads", 'é', 301)), stored);
    }

    #[tokio::test]
    async fn test_long_keys_round_trip_through_scans_and_watches() {
        let (store, _dir) = create_test_store();
        let a = long_key("t", 'a', 600);
        let b = long_key("t", 'b', 600);
        store.set(&a, "va").await.expect("set should succeed");
        store.set(&b, "vb").await.expect("set should succeed");
        store.set("t|c", "vc").await.expect("set should succeed");

        assert_eq!(store.get(&a).await.expect("get").as_deref(), Some("va"));
        assert_eq!(
            store.keys("t|").await.expect("keys should succeed"),
            vec!["t|c".to_string(), a.clone(), b.clone()]
        );
        let narrow = format!("{}a", &a[..a.len() - 1]);
        assert_eq!(store.keys(&narrow).await.expect("keys"), vec![a.clone()]);

        let watch = store.watch(&a).await.expect("watch should succeed");
        store.set(&a, "va2").await.expect("set should succeed");
        let outcome = store
            .commit(&[watch], vec![WriteOp::Del { key: b.clone() }])
            .await
            .expect("commit should succeed");
        assert_eq!(outcome, CommitOutcome::Aborted);

        let outcome = store
            .commit(&[], vec![WriteOp::DelPrefix { prefix: "t|".to_string() }])
            .await
            .expect("commit should succeed");
        assert_eq!(outcome, CommitOutcome::Committed);
        assert!(store.keys("t").await.expect("keys").is_empty());
        assert!(store.get(&a).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store = LmdbStore::new(temp_dir.path(), 10).expect("open");
            store.set("k", "v").await.expect("set");
        }
        let store = LmdbStore::new(temp_dir.path(), 10).expect("reopen");
        assert_eq!(store.get("k").await.expect("get").as_deref(), Some("v"));
        let watch = store.watch("k").await.expect("watch");
        assert!(watch.token > WatchToken::untouched());
    }
}
