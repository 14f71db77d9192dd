//! Store capability traits and cache statistics.
//!
//! The style cache needs a narrow transactional key-value capability:
//! plain reads and writes, prefix enumeration, and a watch/commit pair that
//! applies a batch of writes only if no watched key changed in between.
//! Any store offering compare-and-swap or version-stamped writes can back it.

use async_trait::async_trait;
use mapstyle_core::StyleResult;

/// Version stamp of a key as observed by [`TransactionalStore::watch`].
///
/// Stamps come from a store-wide sequence that advances on every write or
/// delete, so a key that was deleted and recreated never repeats a stamp.
/// A key that has never been written has stamp zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct WatchToken(u64);

impl WatchToken {
    pub fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    /// Stamp of a key that was never written.
    pub fn untouched() -> Self {
        Self(0)
    }

    pub fn sequence(&self) -> u64 {
        self.0
    }
}

/// A watched key and the stamp it had when the watch was placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub key: String,
    pub token: WatchToken,
}

/// One write inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set { key: String, value: String },
    Del { key: String },
    /// Delete every key starting with `prefix`, enumerated at commit time.
    DelPrefix { prefix: String },
}

/// Result of a conditional commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Every write was applied.
    Committed,
    /// A watched key changed; nothing was written.
    Aborted,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Transactional key-value store backing the style cache.
///
/// Implementations must be thread-safe and must apply `commit` atomically:
/// either every op lands or none does, and the watch check happens inside
/// the same critical section as the writes.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Read the value under `key`.
    async fn get(&self, key: &str) -> StyleResult<Option<String>>;

    /// Unconditionally write `value` under `key`.
    async fn set(&self, key: &str, value: &str) -> StyleResult<()>;

    /// Delete `keys`, returning how many existed.
    async fn del(&self, keys: &[String]) -> StyleResult<u64>;

    /// List every key starting with `prefix`, in lexicographic order.
    async fn keys(&self, prefix: &str) -> StyleResult<Vec<String>>;

    /// Observe the current stamp of `key`.
    async fn watch(&self, key: &str) -> StyleResult<Watch>;

    /// Apply `ops` if every watch still matches the key's current stamp.
    ///
    /// With no watches the commit is unconditional.
    async fn commit(&self, watches: &[Watch], ops: Vec<WriteOp>) -> StyleResult<CommitOutcome>;
}

/// Statistics about style cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleCacheStats {
    /// Requests served from a fresh entry.
    pub hits: u64,
    /// Requests that had to render.
    pub misses: u64,
    /// Renders performed (misses plus explicit style updates).
    pub renders: u64,
    /// Transactions that landed.
    pub commits: u64,
    /// Transactions discarded because a watched key changed.
    pub aborted_commits: u64,
}

impl StyleCacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
