//! Lock Ordering Tests
//!
//! Transactions lock their write-sets in one global order, so concurrent
//! transactions over overlapping keys finish without deadlock no matter in
//! which order they wrote the keys. Across several primaries a wait is
//! bounded by the lock acquisition timeout, after which every lock the
//! transaction took anywhere is released.

use crate::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const KEYS: [&str; 8] = ["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7"];

#[test]
fn test_opposite_write_orders_both_commit() {
    let grid = Grid::local().unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [["x", "y"], ["y", "x"]]
        .into_iter()
        .enumerate()
        .map(|(i, order)| {
            let grid = grid.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                for round in 0..50i64 {
                    let tx = grid.begin().unwrap();
                    for key in order {
                        tx.put(key, i as i64 * 100 + round).unwrap();
                    }
                    if round == 0 {
                        barrier.wait();
                    }
                    tx.commit().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(grid.stats().locks_held, 0);
    assert_eq!(grid.stats().transactions.committed, 100);
    assert_eq!(grid.get("x").unwrap(), grid.get("y").unwrap());
}

#[test]
fn test_randomized_contention_across_members() {
    const THREADS: usize = 6;
    const ROUNDS: usize = 20;

    let c = Arc::new(TestCluster::replicated(&["a", "b", "c"]));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let c = Arc::clone(&c);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(0x5eed + t as u64);
                barrier.wait();
                for round in 0..ROUNDS {
                    let grid = &c.grids[rng.gen_range(0..c.grids.len())];
                    let mut keys = KEYS.to_vec();
                    keys.shuffle(&mut rng);
                    keys.truncate(rng.gen_range(2..=4));

                    let tx = grid.begin().unwrap();
                    let value = (t * 1000 + round) as i64;
                    for key in &keys {
                        tx.put(*key, value).unwrap();
                    }
                    tx.commit().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
    for key in KEYS {
        let copies = c.copies(key);
        assert!(
            copies.iter().all(|v| *v == copies[0]),
            "members disagree on {}: {:?}",
            key,
            copies
        );
    }
}

/// Distributed variant: write-sets span several primaries, so a transaction
/// may wait on one member while holding locks on another. Such waits end in
/// a lock timeout and the transaction is retried.
#[test]
fn test_randomized_contention_across_primaries() {
    const THREADS: usize = 6;
    const ROUNDS: usize = 15;

    let mut config = GridConfig::clustered(CacheMode::Distributed);
    config.clustering.num_owners = 2;
    config.locking.acquisition_timeout_ms = 250;
    let c = Arc::new(TestCluster::start(&["a", "b", "c", "d"], config));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let c = Arc::clone(&c);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(0xd157 + t as u64);
                barrier.wait();
                for round in 0..ROUNDS {
                    let mut keys = KEYS.to_vec();
                    keys.shuffle(&mut rng);
                    keys.truncate(rng.gen_range(2..=4));
                    let value = (t * 1000 + round) as i64;

                    let mut attempts = 0;
                    loop {
                        let grid = &c.grids[rng.gen_range(0..c.grids.len())];
                        let tx = grid.begin().unwrap();
                        for key in &keys {
                            tx.put(*key, value).unwrap();
                        }
                        match tx.commit() {
                            Ok(()) => break,
                            Err(e) if e.is_lock_timeout() => {
                                attempts += 1;
                                assert!(attempts < 100, "transaction starved: {}", e);
                                thread::sleep(Duration::from_millis(rng.gen_range(0..20)));
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

    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
    for key in KEYS {
        let owners = c.grid("a").owners(key);
        let copies: Vec<_> = owners
            .iter()
            .map(|o| c.grid(o.name()).node().container().peek(&Key::from(key)).map(|e| e.value))
            .collect();
        assert!(
            copies.iter().all(|v| v.is_some() && *v == copies[0]),
            "owners disagree on {}: {:?}",
            key,
            copies
        );
        let mut holders = c.holders(key);
        let mut expected = owners.clone();
        holders.sort();
        expected.sort();
        assert_eq!(holders, expected, "holders of {}", key);
    }
}

#[test]
fn test_zero_timeout_fails_fast_on_held_lock() {
    use gridkv::gridkv_core::{Flag, FlagSet, Metadata, Modification};
    use gridkv::gridkv_engine::{Command, PrepareCommand};

    let grid = Grid::local().unwrap();
    let node = grid.node();

    let holder = node.begin();
    node.execute_in(
        &holder,
        &Command::write(Modification::Put {
            key: Key::from("k"),
            value: Value::Int(1),
            metadata: Metadata::new(),
            flags: FlagSet::empty(),
        }),
    )
    .unwrap();
    node.execute_in(
        &holder,
        &Command::Prepare(PrepareCommand {
            gtx: holder.gtx().clone(),
            modifications: holder.modifications(),
            one_phase_commit: false,
        }),
    )
    .unwrap();
    assert_eq!(grid.stats().locks_held, 1);

    let err = grid
        .node()
        .write(Modification::Put {
            key: Key::from("k"),
            value: Value::Int(2),
            metadata: Metadata::new(),
            flags: FlagSet::of(Flag::ZeroLockAcquisitionTimeout),
        })
        .unwrap_err();
    assert!(err.is_lock_timeout());

    node.rollback(&holder).unwrap();
    assert_eq!(grid.stats().locks_held, 0);
    grid.put("k", 3i64).unwrap();
    assert_eq!(grid.get("k").unwrap(), int(3));
}
