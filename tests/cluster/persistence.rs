//! Persistence Tests
//!
//! Write-through, read-through and preload against the in-memory store.

use crate::*;
use gridkv::gridkv_core::{Flag, FlagSet, InternalCacheEntry, Modification};
use gridkv::gridkv_persistence::InMemoryStore;
use gridkv::Error;
use std::sync::Arc;

fn stored(store: &InMemoryStore, key: &str) -> Option<Value> {
    store.peek(&Key::from(key)).map(|e| e.value)
}

fn grid_with(store: &Arc<InMemoryStore>) -> Grid {
    init_tracing();
    Grid::builder().loader(store.clone()).build().unwrap()
}

// =============================================================================
// WRITE-THROUGH
// =============================================================================

#[test]
fn test_put_and_remove_write_through() {
    let store = Arc::new(InMemoryStore::new("mem"));
    let grid = grid_with(&store);

    grid.put("k", 1i64).unwrap();
    assert_eq!(stored(&store, "k"), int(1));

    grid.remove("k").unwrap();
    assert_eq!(stored(&store, "k"), None);
    assert_eq!(grid.stats().store.cache_loader_stores, 1);
}

#[test]
fn test_commit_stores_write_set_in_one_batch() {
    let store = Arc::new(InMemoryStore::new("mem"));
    let grid = grid_with(&store);

    let tx = grid.begin().unwrap();
    let gtx = tx.gtx().clone();
    for (i, key) in ["x", "y", "z"].into_iter().enumerate() {
        tx.put(key, i as i64).unwrap();
    }
    assert!(store.is_empty());
    tx.commit().unwrap();

    assert_eq!(store.calls().bulk_stores, 1);
    assert_eq!(store.calls().stores, 0);
    assert_eq!(stored(&store, "z"), int(2));
    assert_eq!(store.committed(), vec![gtx]);
    assert!(grid.node().store().preparing_transactions().is_empty());
}

#[test]
fn test_commit_without_bulk_stores_each_entry() {
    let store = Arc::new(InMemoryStore::with_bulk("mem", false));
    let grid = grid_with(&store);

    let tx = grid.begin().unwrap();
    tx.put("x", 1i64).unwrap();
    tx.put("y", 2i64).unwrap();
    tx.put("z", 3i64).unwrap();
    tx.commit().unwrap();

    assert_eq!(store.calls().stores, 3);
    assert_eq!(store.calls().bulk_stores, 0);
    assert_eq!(store.len(), 3);
}

#[test]
fn test_rolled_back_transaction_never_reaches_store() {
    let store = Arc::new(InMemoryStore::new("mem"));
    let grid = grid_with(&store);

    let tx = grid.begin().unwrap();
    let gtx = tx.gtx().clone();
    tx.put("x", 1i64).unwrap();
    tx.rollback().unwrap();

    assert!(store.is_empty());
    assert_eq!(store.rolled_back(), vec![gtx]);
}

#[test]
fn test_unavailable_store_fails_commit_and_keeps_memory() {
    let store = Arc::new(InMemoryStore::new("mem"));
    let grid = grid_with(&store);
    grid.put("k", 1i64).unwrap();

    store.set_available(false);
    let tx = grid.begin().unwrap();
    tx.put("k", 2i64).unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(err, Error::Persistence(_)), "unexpected error {}", err);

    assert_eq!(grid.get("k").unwrap(), int(1));
    assert_eq!(stored(&store, "k"), int(1));
    let stats = grid.stats();
    assert_eq!(stats.locks_held, 0);
    assert_eq!(stats.transactions.local, 0);
    assert!(grid.node().store().preparing_transactions().is_empty());

    store.set_available(true);
    grid.put("k", 3i64).unwrap();
    assert_eq!(stored(&store, "k"), int(3));
}

#[test]
fn test_skip_cache_store_flag() {
    let store = Arc::new(InMemoryStore::new("mem"));
    let grid = grid_with(&store);

    grid.node()
        .write(Modification::Put {
            key: Key::from("k"),
            value: Value::Int(1),
            metadata: Metadata::new(),
            flags: FlagSet::of(Flag::SkipCacheStore),
        })
        .unwrap();

    assert_eq!(grid.get("k").unwrap(), int(1));
    assert!(store.is_empty());
}

// =============================================================================
// READ-THROUGH AND PRELOAD
// =============================================================================

#[test]
fn test_read_through_populates_memory() {
    let store = Arc::new(InMemoryStore::new("mem"));
    gridkv::gridkv_persistence::CacheLoader::store(
        store.as_ref(),
        InternalCacheEntry::new(Key::from("k"), Value::Int(4), Metadata::new()),
    )
    .unwrap();
    let grid = grid_with(&store);
    assert!(grid.node().container().is_empty());

    assert_eq!(grid.get("k").unwrap(), int(4));
    assert!(grid.node().container().contains_key(&Key::from("k")));
}

#[test]
fn test_shared_store_written_once_per_operation() {
    init_tracing();
    let mut config = GridConfig::clustered(CacheMode::Replicated);
    config.persistence.shared = true;
    let store = Arc::new(InMemoryStore::new("shared"));
    let cluster = LocalCluster::new();
    let grids: Vec<Grid> = ["a", "b"]
        .into_iter()
        .map(|name| {
            Grid::builder()
                .config(config.clone())
                .transport(cluster.transport(name))
                .loader(store.clone())
                .build()
                .unwrap()
        })
        .collect();
    cluster.install_view(&["a", "b"], false);

    grids[1].put("k", 1i64).unwrap();

    assert_eq!(store.calls().bulk_stores, 1);
    assert_eq!(stored(&store, "k"), int(1));
    assert_eq!(grids[0].get("k").unwrap(), int(1));
}

#[test]
fn test_private_stores_written_by_every_owner() {
    init_tracing();
    let config = GridConfig::clustered(CacheMode::Replicated);
    let stores = [Arc::new(InMemoryStore::new("a")), Arc::new(InMemoryStore::new("b"))];
    let cluster = LocalCluster::new();
    let grids: Vec<Grid> = ["a", "b"]
        .into_iter()
        .zip(stores.iter())
        .map(|(name, store)| {
            Grid::builder()
                .config(config.clone())
                .transport(cluster.transport(name))
                .loader(store.clone())
                .build()
                .unwrap()
        })
        .collect();
    cluster.install_view(&["a", "b"], false);

    let tx = grids[0].begin().unwrap();
    tx.put("k", 1i64).unwrap();
    tx.commit().unwrap();

    for store in &stores {
        assert_eq!(stored(store, "k"), int(1));
        assert_eq!(store.committed().len(), 1);
    }
}

#[test]
fn test_preload_fills_owners_only() {
    init_tracing();
    let names = ["a", "b", "c", "d"];
    let mut config = GridConfig::clustered(CacheMode::Distributed);
    config.persistence.shared = true;
    config.persistence.preload = true;

    let store = Arc::new(InMemoryStore::new("shared"));
    let keys: Vec<String> = (0..24).map(|i| format!("key-{}", i)).collect();
    for (i, key) in keys.iter().enumerate() {
        gridkv::gridkv_persistence::CacheLoader::store(
            store.as_ref(),
            InternalCacheEntry::new(Key::from(key.as_str()), Value::Int(i as i64), Metadata::new()),
        )
        .unwrap();
    }

    // Owners are computed from the view seen at startup
    let cluster = LocalCluster::new();
    let transports: Vec<_> = names.iter().map(|n| cluster.transport(n)).collect();
    cluster.install_view(&names, false);
    let grids = transports
        .into_iter()
        .map(|transport| {
            Grid::builder()
                .config(config.clone())
                .transport(transport)
                .loader(store.clone())
                .build()
                .unwrap()
        })
        .collect();
    let c = TestCluster {
        cluster,
        names: names.to_vec(),
        grids,
    };

    for key in &keys {
        let mut holders = c.holders(key);
        let mut owners = c.grid("a").owners(key.as_str());
        holders.sort();
        owners.sort();
        assert_eq!(holders, owners, "holders of {}", key);
    }
    let total: usize = c.grids.iter().map(|g| g.stats().entries).sum();
    assert_eq!(total, keys.len() * 2);
}
