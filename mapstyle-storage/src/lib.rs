//! MAPSTYLE Storage - Stores and the Style Cache Controller
//!
//! Persists compiled stylesheets keyed by identity and keeps derived
//! entries consistent with the base entry they were rendered from.

pub mod cache;

pub use cache::{
    CacheStatus, CommitOutcome, ConsistencyGuard, DecodedKey, InMemoryStore, KeyDeriver,
    LmdbStore, LmdbStoreError, PooledConnection, PurgeReport, ResourceCachePurger, StorePool,
    StyleCache, StyleCacheStats, StyleRead, TransactionalStore, Watch, WatchToken, WriteOp,
};
