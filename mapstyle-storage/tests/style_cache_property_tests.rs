//! Property-based tests for the style cache.
//!
//! Properties:
//! - set_style followed by get_style(false) returns exactly what was set
//! - after set_style no extended key derived from the base remains
//! - every identity's active key is its extended key when one exists and
//!   is always under the base key's derived prefix

use std::sync::Arc;

use mapstyle_storage::{InMemoryStore, KeyDeriver, StorePool, StyleCache, TransactionalStore};
use mapstyle_test_utils::generators::*;
use mapstyle_test_utils::*;
use proptest::prelude::*;
use tempfile::TempDir;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build")
}

fn cache_for(
    identity: Identity,
    root: &TempDir,
    store: &Arc<InMemoryStore>,
) -> StyleCache<InMemoryStore> {
    let config = Arc::new(fixtures::test_config(root.path()));
    let pool = StorePool::new(Arc::clone(store), 2);
    StyleCache::new(identity, config, MockCollaborators::new().collaborators(), pool)
        .expect("cache construction should succeed")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_set_then_get_returns_record(record in arb_style_record()) {
        let root = TempDir::new().expect("TempDir creation should succeed");
        let store = Arc::new(InMemoryStore::new());
        let mut cache = cache_for(fixtures::roads(), &root, &store);

        let fetched = runtime().block_on(async {
            cache.set_style(record.clone(), false).await?;
            cache.get_style(false).await
        }).expect("set/get should succeed");

        prop_assert_eq!(fetched, record);
    }

    #[test]
    fn prop_set_style_leaves_no_derived_keys(
        filters in proptest::collection::vec(arb_sql_filter(), 1..4),
        record in arb_style_record(),
    ) {
        let root = TempDir::new().expect("TempDir creation should succeed");
        let store = Arc::new(InMemoryStore::new());
        let prefix = KeyDeriver::derived_prefix(&KeyDeriver::base_key(&fixtures::roads()));

        let remaining = runtime().block_on(async {
            for sql in &filters {
                cache_for(fixtures::roads().with_sql_filter(sql.clone()), &root, &store)
                    .init()
                    .await?;
            }
            cache_for(fixtures::roads(), &root, &store)
                .set_style(record, false)
                .await?;
            store.keys(&prefix).await
        }).expect("operations should succeed");

        prop_assert!(remaining.is_empty());
    }

    #[test]
    fn prop_active_key_is_under_base(identity in arb_identity()) {
        let root = TempDir::new().expect("TempDir creation should succeed");
        let store = Arc::new(InMemoryStore::new());
        let cache = cache_for(identity.clone(), &root, &store);

        let has_overrides = identity.sql_filter().is_some() || identity.style_override().is_some();
        prop_assert_eq!(cache.extended_key().is_some(), has_overrides);
        prop_assert_eq!(cache.base_key(), KeyDeriver::base_key(&identity));
        if let Some(extended) = cache.extended_key() {
            prop_assert!(extended.starts_with(&KeyDeriver::derived_prefix(cache.base_key())));
            prop_assert_eq!(cache.active_key(), extended);
        }
    }
}
