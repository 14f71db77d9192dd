//! Style cache with optimistic consistency over a transactional store.
//!
//! # Layers
//!
//! - [`KeyDeriver`] turns an identity into its base key and, when a row
//!   filter or style override is active, an extended key.
//! - [`TransactionalStore`] is the narrow store capability: get/set/del,
//!   prefix enumeration, and watch plus conditional commit. [`InMemoryStore`]
//!   and [`LmdbStore`] implement it; [`StorePool`] bounds concurrent use.
//! - [`ConsistencyGuard`] runs the watch/commit protocol.
//! - [`ResourceCachePurger`] clears the localizer's per-identity directory.
//! - [`StyleCache`] orchestrates all of the above per identity.
//!
//! # Example
//!
//! ```ignore
//! let pool = StorePool::new(Arc::new(InMemoryStore::new()), 8);
//! let mut cache = StyleCache::new(identity, config, collaborators, pool)?;
//!
//! cache.set_style(StyleRecord::new("#roads { line-width: 2; }", "3.0.12"), false).await?;
//! let xml = cache.to_xml().await?;
//! ```

pub mod guard;
pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod pool;
pub mod purger;
pub mod style_cache;
pub mod traits;

pub use guard::ConsistencyGuard;
pub use key::{DecodedKey, KeyDeriver, KEY_NAMESPACE};
pub use lmdb_backend::{LmdbStore, LmdbStoreError, MAX_INLINE_KEY};
pub use memory::InMemoryStore;
pub use pool::{PooledConnection, StorePool};
pub use purger::{PurgeReport, ResourceCachePurger};
pub use style_cache::{CacheStatus, StyleCache, StyleRead};
pub use traits::{CommitOutcome, StyleCacheStats, TransactionalStore, Watch, WatchToken, WriteOp};
