//! Write Skew Tests
//!
//! With the check on, a transaction whose reads went stale cannot commit.
//! The primary owner performs the check: the coordinator "a" in replicated
//! mode, the first owner on the ring in distributed mode.

use crate::*;
use gridkv::gridkv_core::{VectorClock, VersionComparison};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn skew_checked_cluster() -> TestCluster {
    let mut config = GridConfig::clustered(CacheMode::Replicated);
    config.transaction.write_skew_check = true;
    TestCluster::start(&["a", "b", "c"], config)
}

fn distributed_skew_checked(names: &[&'static str], num_owners: usize) -> TestCluster {
    let mut config = GridConfig::clustered(CacheMode::Distributed);
    config.clustering.num_owners = num_owners;
    config.transaction.write_skew_check = true;
    config.locking.acquisition_timeout_ms = 500;
    TestCluster::start(names, config)
}

fn candidates() -> Vec<String> {
    (0..64).map(|i| format!("key-{}", i)).collect()
}

fn versions(c: &TestCluster, key: &str) -> Vec<Option<VectorClock>> {
    c.grids
        .iter()
        .map(|g| g.node().container().version(&Key::from(key)))
        .collect()
}

#[test]
fn test_write_skew_config_enables_versioning() {
    let c = skew_checked_cluster();
    let config = c.grid("a").node().config();
    assert!(config.versioning.enabled);
    assert!(!config.transaction.one_phase_commit);
    assert!(c.grid("a").node().stages().contains(&"versioning"));
}

#[test]
fn test_stale_read_fails_commit() {
    let c = skew_checked_cluster();
    c.grid("a").put("k", 0i64).unwrap();

    let tx = c.grid("b").begin().unwrap();
    assert_eq!(tx.get("k").unwrap(), int(0));
    c.grid("a").put("k", 5i64).unwrap();
    tx.put("k", 1i64).unwrap();

    let err = tx.commit().unwrap_err();
    assert!(err.is_write_skew(), "unexpected error {}", err);
    assert!(err.is_retryable());

    assert_eq!(c.copies("k"), vec![int(5), int(5), int(5)]);
    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
}

#[test]
fn test_absent_read_then_insert_fails_commit() {
    let c = skew_checked_cluster();

    let tx = c.grid("c").begin().unwrap();
    assert_eq!(tx.get("k").unwrap(), None);
    c.grid("b").put("k", 3i64).unwrap();
    tx.put("k", 1i64).unwrap();

    assert!(tx.commit().unwrap_err().is_write_skew());
    assert_eq!(c.copies("k"), vec![int(3), int(3), int(3)]);
}

#[test]
fn test_current_read_commits_with_one_version_everywhere() {
    let c = skew_checked_cluster();
    c.grid("a").put("k", 0i64).unwrap();
    let before = versions(&c, "k");
    assert!(before.iter().all(|v| v.is_some() && *v == before[0]));

    let tx = c.grid("b").begin().unwrap();
    assert_eq!(tx.get("k").unwrap(), int(0));
    tx.put("k", 1i64).unwrap();
    tx.commit().unwrap();

    let after = versions(&c, "k");
    assert!(after.iter().all(|v| v.is_some() && *v == after[0]));
    assert_ne!(after[0], before[0]);
    assert_eq!(c.copies("k"), vec![int(1), int(1), int(1)]);
}

#[test]
fn test_unread_keys_are_not_checked() {
    let c = skew_checked_cluster();
    c.grid("a").put("k", 0i64).unwrap();

    let tx = c.grid("b").begin().unwrap();
    tx.put("k", 1i64).unwrap();
    c.grid("a").put("k", 5i64).unwrap();
    tx.commit().unwrap();

    assert_eq!(c.copies("k"), vec![int(1), int(1), int(1)]);
}

// =============================================================================
// DISTRIBUTED
// =============================================================================

#[test]
fn test_writes_from_non_owner_advance_primary_version() {
    let c = distributed_skew_checked(&["a", "b", "c"], 1);
    let key = c.key_owned_by(&candidates(), "a", "c");
    let primary = c.grid("a").node().container();

    c.grid("c").put(key.as_str(), 1i64).unwrap();
    let first = primary.version(&Key::from(key.as_str())).unwrap();
    c.grid("c").put(key.as_str(), 2i64).unwrap();
    let second = primary.version(&Key::from(key.as_str())).unwrap();

    assert_eq!(second.compare(&first), VersionComparison::After);
    assert!(!c.grid("c").node().container().contains_key(&Key::from(key.as_str())));
}

#[test]
fn test_non_owner_write_makes_primary_read_stale() {
    let c = distributed_skew_checked(&["a", "b", "c"], 1);
    let key = c.key_owned_by(&candidates(), "a", "c");
    c.grid("c").put(key.as_str(), 1i64).unwrap();

    let tx = c.grid("a").begin().unwrap();
    assert_eq!(tx.get(key.as_str()).unwrap(), int(1));
    c.grid("c").put(key.as_str(), 2i64).unwrap();
    tx.put(key.as_str(), 3i64).unwrap();

    let err = tx.commit().unwrap_err();
    assert!(err.is_write_skew(), "unexpected error {}", err);
    assert_eq!(c.grid("b").get(key.as_str()).unwrap(), int(2));
    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
}

#[test]
fn test_remote_read_goes_stale_on_backup_owned_key() {
    let c = distributed_skew_checked(&["a", "b", "c", "d"], 2);
    let key = c.key_owned_by(&candidates(), "a", "d");
    c.grid("b").put(key.as_str(), 0i64).unwrap();

    let tx = c.grid("d").begin().unwrap();
    assert_eq!(tx.get(key.as_str()).unwrap(), int(0));
    c.grid("c").put(key.as_str(), 5i64).unwrap();
    tx.put(key.as_str(), 1i64).unwrap();

    assert!(tx.commit().unwrap_err().is_write_skew());
    for owner in c.grid("a").owners(key.as_str()) {
        let stored = c.grid(owner.name()).node().container().peek(&Key::from(key.as_str()));
        assert_eq!(stored.map(|e| e.value), int(5));
    }
    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
}

#[test]
fn test_concurrent_increments_are_never_lost() {
    const THREADS: usize = 4;
    const INCREMENTS: usize = 10;

    let c = Arc::new(distributed_skew_checked(&["a", "b", "c", "d"], 2));
    c.grid("a").put("counter", 0i64).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let c = Arc::clone(&c);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(0xc0de + t as u64);
                barrier.wait();
                for _ in 0..INCREMENTS {
                    let mut attempts = 0;
                    loop {
                        let grid = &c.grids[rng.gen_range(0..c.grids.len())];
                        let tx = grid.begin().unwrap();
                        let current = match tx.get("counter").unwrap() {
                            Some(Value::Int(n)) => n,
                            other => panic!("unexpected counter {:?}", other),
                        };
                        tx.put("counter", current + 1).unwrap();
                        match tx.commit() {
                            Ok(()) => break,
                            Err(e) if e.is_retryable() => {
                                attempts += 1;
                                assert!(attempts < 500, "increment starved: {}", e);
                                thread::sleep(Duration::from_millis(rng.gen_range(0..3)));
                            }
                            Err(e) => panic!("unexpected error {}", e),
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = int((THREADS * INCREMENTS) as i64);
    for owner in c.grid("a").owners("counter") {
        assert_eq!(c.grid(owner.name()).get("counter").unwrap(), expected);
    }
    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
}
