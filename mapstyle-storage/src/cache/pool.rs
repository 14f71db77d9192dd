//! Bounded connection pool over a shared store.
//!
//! Backed by a `deadpool` unmanaged pool holding one handle per slot. A
//! lease is an RAII value: dropping it returns the handle, so a lease is
//! released on every exit path of an operation, including `?` returns.

use std::ops::Deref;
use std::sync::Arc;

use deadpool::unmanaged::{Object, Pool, PoolError};
use mapstyle_core::{StoreError, StyleResult};

use super::traits::TransactionalStore;

/// Bounded pool of store connections.
pub struct StorePool<S> {
    store: Arc<S>,
    handles: Pool<Arc<S>>,
    max_connections: usize,
}

impl<S> Clone for StorePool<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            handles: self.handles.clone(),
            max_connections: self.max_connections,
        }
    }
}

impl<S> std::fmt::Debug for StorePool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorePool")
            .field("max_connections", &self.max_connections)
            .field("closed", &self.handles.is_closed())
            .finish_non_exhaustive()
    }
}

fn pool_err(e: PoolError) -> StoreError {
    let reason = match e {
        PoolError::Closed => "connection pool is closed".to_string(),
        other => other.to_string(),
    };
    StoreError::Connection { reason }
}

impl<S: TransactionalStore> StorePool<S> {
    /// Create a pool allowing at most `max_connections` concurrent leases
    /// (at least one).
    pub fn new(store: Arc<S>, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        let handles: Vec<Arc<S>> = (0..max_connections).map(|_| Arc::clone(&store)).collect();
        Self {
            store,
            handles: Pool::from(handles),
            max_connections,
        }
    }

    /// Wait for a free slot and lease a connection.
    ///
    /// # Errors
    /// `StoreError::Connection` once the pool has been closed.
    pub async fn acquire(&self) -> StyleResult<PooledConnection<S>> {
        let handle = self.handles.get().await.map_err(pool_err)?;
        Ok(PooledConnection { handle })
    }

    /// Number of leases currently outstanding.
    pub fn leased(&self) -> usize {
        let available = usize::try_from(self.handles.status().available).unwrap_or(0);
        self.max_connections.saturating_sub(available)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Refuse further leases. Outstanding leases stay valid.
    pub fn close(&self) {
        self.handles.close();
    }

    /// The underlying store, bypassing the pool.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

/// A leased connection; the slot is returned when this is dropped.
pub struct PooledConnection<S> {
    handle: Object<Arc<S>>,
}

impl<S> std::fmt::Debug for PooledConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl<S> Deref for PooledConnection<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.handle
    }
}
