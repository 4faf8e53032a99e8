//! Replicated Mode Tests
//!
//! Every member holds every entry.

use crate::*;
use std::sync::{Arc, Barrier};
use std::thread;

// =============================================================================
// NON-TRANSACTIONAL WRITES
// =============================================================================

#[test]
fn test_put_reaches_every_member() {
    let c = TestCluster::replicated(&["a", "b", "c"]);

    c.grid("b").put("k", 1i64).unwrap();

    assert_eq!(c.copies("k"), vec![int(1), int(1), int(1)]);
    for grid in &c.grids {
        assert_eq!(grid.get("k").unwrap(), Some(Value::Int(1)));
    }
    assert_eq!(c.locks_held(), 0);
}

#[test]
fn test_remove_reaches_every_member() {
    let c = TestCluster::replicated(&["a", "b", "c"]);
    c.grid("a").put("k", 1i64).unwrap();

    c.grid("c").remove("k").unwrap();

    assert_eq!(c.copies("k"), vec![None, None, None]);
}

#[test]
fn test_conditional_replace() {
    let c = TestCluster::replicated(&["a", "b", "c"]);
    c.grid("a").put("k", 1i64).unwrap();

    assert!(c.grid("b").replace("k", 1i64, 2i64).unwrap());
    assert_eq!(c.copies("k"), vec![int(2), int(2), int(2)]);

    assert!(!c.grid("c").replace("k", 1i64, 3i64).unwrap());
    assert_eq!(c.copies("k"), vec![int(2), int(2), int(2)]);
}

#[test]
fn test_writes_from_backups_pass_through_coordinator() {
    let c = TestCluster::replicated(&["a", "b", "c"]);

    c.grid("c").put("k", 1i64).unwrap();
    c.grid("b").put("k", 2i64).unwrap();

    let versions: Vec<_> = c
        .grids
        .iter()
        .map(|g| g.node().container().version(&Key::from("k")))
        .collect();
    assert!(versions.iter().all(|v| v.is_some() && *v == versions[0]));
    assert_eq!(c.copies("k"), vec![int(2), int(2), int(2)]);
}

#[test]
fn test_concurrent_writers_converge() {
    const ROUNDS: i64 = 100;
    let c = Arc::new(TestCluster::replicated(&["a", "b", "c"]));

    for round in 0..ROUNDS {
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let c = Arc::clone(&c);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    c.grid(name).put("k", round * 10 + i as i64).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let copies = c.copies("k");
        assert!(
            copies.iter().all(|v| *v == copies[0]),
            "round {}: members disagree: {:?}",
            round,
            copies
        );
    }
    assert_eq!(c.locks_held(), 0);
}

#[test]
fn test_clear_empties_every_member() {
    let c = TestCluster::replicated(&["a", "b", "c"]);
    c.grid("a").put_all([("x", 1i64), ("y", 2i64)]).unwrap();
    assert!(c.grids.iter().all(|g| g.stats().entries == 2));

    c.grid("c").clear().unwrap();

    assert!(c.grids.iter().all(|g| g.stats().entries == 0));
}

#[test]
fn test_invalidate_drops_every_copy() {
    let c = TestCluster::replicated(&["a", "b", "c"]);
    c.grid("a").put("k", 1i64).unwrap();
    c.grid("a").put("other", 2i64).unwrap();

    c.grid("b").invalidate(["k"]).unwrap();

    assert_eq!(c.copies("k"), vec![None, None, None]);
    assert_eq!(c.copies("other"), vec![int(2), int(2), int(2)]);
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

#[test]
fn test_commit_from_backup_reaches_every_member() {
    let c = TestCluster::replicated(&["a", "b", "c"]);

    let tx = c.grid("c").begin().unwrap();
    tx.put("x", 1i64).unwrap();
    tx.put("y", 2i64).unwrap();
    assert_eq!(c.copies("x"), vec![None, None, None]);
    tx.commit().unwrap();

    assert_eq!(c.copies("x"), vec![int(1), int(1), int(1)]);
    assert_eq!(c.copies("y"), vec![int(2), int(2), int(2)]);
    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
    assert_eq!(c.grid("c").stats().transactions.committed, 1);
}

#[test]
fn test_commit_from_coordinator() {
    let c = TestCluster::replicated(&["a", "b", "c"]);

    let tx = c.grid("a").begin().unwrap();
    tx.put("x", 1i64).unwrap();
    tx.commit().unwrap();

    assert_eq!(c.copies("x"), vec![int(1), int(1), int(1)]);
    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
}

#[test]
fn test_rollback_leaves_no_trace() {
    let c = TestCluster::replicated(&["a", "b", "c"]);

    let tx = c.grid("b").begin().unwrap();
    tx.put("x", 1i64).unwrap();
    tx.rollback().unwrap();

    assert_eq!(c.copies("x"), vec![None, None, None]);
    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
}

#[test]
fn test_reads_repeat_inside_transaction() {
    let c = TestCluster::replicated(&["a", "b", "c"]);
    c.grid("a").put("k", 1i64).unwrap();

    let tx = c.grid("b").begin().unwrap();
    assert_eq!(tx.get("k").unwrap(), int(1));
    c.grid("c").put("k", 2i64).unwrap();
    assert_eq!(tx.get("k").unwrap(), int(1));
    tx.commit().unwrap();

    assert_eq!(c.grid("b").get("k").unwrap(), int(2));
}

#[test]
fn test_transactional_replace_and_delta() {
    let c = TestCluster::replicated(&["a", "b", "c"]);
    c.grid("a").put("k", 1i64).unwrap();

    let tx = c.grid("b").begin().unwrap();
    assert!(!tx.replace("k", 7i64, 8i64).unwrap());
    assert!(tx.replace("k", 1i64, 5i64).unwrap());
    tx.apply_delta("m", Delta::new().set("x", 1i64)).unwrap();
    tx.apply_delta("m", Delta::new().set("y", 2i64)).unwrap();
    tx.commit().unwrap();

    assert_eq!(c.copies("k"), vec![int(5), int(5), int(5)]);
    for copy in c.copies("m") {
        let value = copy.unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.get("x"), Some(&Value::Int(1)));
        assert_eq!(map.get("y"), Some(&Value::Int(2)));
    }
}

#[test]
fn test_transactional_clear() {
    let c = TestCluster::replicated(&["a", "b"]);
    c.grid("a").put("old", 1i64).unwrap();

    let tx = c.grid("b").begin().unwrap();
    tx.clear().unwrap();
    assert_eq!(tx.get("old").unwrap(), None);
    tx.put("new", 2i64).unwrap();
    tx.commit().unwrap();

    assert_eq!(c.copies("old"), vec![None, None]);
    assert_eq!(c.copies("new"), vec![int(2), int(2)]);
    assert_eq!(c.locks_held(), 0);
}
