//! Distributed Mode Tests
//!
//! Each key lives on `num_owners` members chosen by the hash ring.

use crate::*;
use std::sync::{Arc, Barrier};
use std::thread;

const MEMBERS: [&str; 4] = ["a", "b", "c", "d"];

fn keys() -> Vec<String> {
    (0..24).map(|i| format!("key-{}", i)).collect()
}

fn sorted(mut addresses: Vec<gridkv::Address>) -> Vec<gridkv::Address> {
    addresses.sort();
    addresses
}

/// A key `name` does not own, and the member that wrote it
fn foreign_key(c: &TestCluster, name: &str) -> String {
    keys()
        .into_iter()
        .find(|k| !c.grid(name).owners(k.as_str()).contains(c.grid(name).address()))
        .unwrap_or_else(|| panic!("{} owns every test key", name))
}

#[test]
fn test_every_member_agrees_on_owners() {
    let c = TestCluster::distributed(&MEMBERS, 2);
    for key in keys() {
        let owners = c.grids[0].owners(key.as_str());
        assert_eq!(owners.len(), 2);
        for grid in &c.grids[1..] {
            assert_eq!(grid.owners(key.as_str()), owners, "owners of {}", key);
        }
    }
}

#[test]
fn test_entries_live_on_their_owners_only() {
    let c = TestCluster::distributed(&MEMBERS, 2);
    for (i, key) in keys().iter().enumerate() {
        c.grids[i % MEMBERS.len()].put(key.as_str(), i as i64).unwrap();
    }
    for key in keys() {
        assert_eq!(
            sorted(c.holders(&key)),
            sorted(c.grids[0].owners(key.as_str())),
            "holders of {}",
            key
        );
    }
    assert_eq!(c.locks_held(), 0);
}

#[test]
fn test_non_owner_reads_from_owners() {
    let c = TestCluster::distributed(&MEMBERS, 2);
    let key = foreign_key(&c, "d");
    c.grid("a").put(key.as_str(), 42i64).unwrap();

    assert_eq!(c.grid("d").get(key.as_str()).unwrap(), int(42));
    assert!(!c.grid("d").node().container().contains_key(&Key::from(key.as_str())));
}

#[test]
fn test_non_owner_replace() {
    let c = TestCluster::distributed(&MEMBERS, 2);
    let key = foreign_key(&c, "b");
    c.grid("a").put(key.as_str(), 1i64).unwrap();

    assert!(!c.grid("b").replace(key.as_str(), 9i64, 2i64).unwrap());
    assert!(c.grid("b").replace(key.as_str(), 1i64, 2i64).unwrap());

    for owner in c.grid("b").owners(key.as_str()) {
        assert_eq!(c.grid(owner.name()).get(key.as_str()).unwrap(), int(2));
    }
}

#[test]
fn test_transaction_from_non_owner() {
    let c = TestCluster::distributed(&MEMBERS, 2);
    let key = foreign_key(&c, "c");

    let tx = c.grid("c").begin().unwrap();
    assert_eq!(tx.get(key.as_str()).unwrap(), None);
    tx.put(key.as_str(), 7i64).unwrap();
    tx.commit().unwrap();

    assert_eq!(
        sorted(c.holders(&key)),
        sorted(c.grid("c").owners(key.as_str()))
    );
    assert_eq!(c.grid("c").get(key.as_str()).unwrap(), int(7));
    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
}

#[test]
fn test_transaction_spanning_many_owners() {
    let c = TestCluster::distributed(&MEMBERS, 2);

    let tx = c.grid("a").begin().unwrap();
    for (i, key) in keys().iter().enumerate() {
        tx.put(key.as_str(), i as i64).unwrap();
    }
    tx.commit().unwrap();

    for (i, key) in keys().iter().enumerate() {
        assert_eq!(sorted(c.holders(key)), sorted(c.grid("a").owners(key.as_str())));
        assert_eq!(c.grid("d").get(key.as_str()).unwrap(), int(i as i64));
    }
    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
}

#[test]
fn test_delta_from_non_owner_merges_with_stored_map() {
    let c = TestCluster::distributed(&MEMBERS, 2);
    let key = foreign_key(&c, "d");
    c.grid("a")
        .apply_delta(key.as_str(), Delta::new().set("x", 1i64))
        .unwrap();

    c.grid("d")
        .apply_delta(key.as_str(), Delta::new().set("y", 2i64))
        .unwrap();

    let value = c.grid("b").get(key.as_str()).unwrap().unwrap();
    let map = value.as_map().unwrap();
    assert_eq!(map.get("x"), Some(&Value::Int(1)));
    assert_eq!(map.get("y"), Some(&Value::Int(2)));
}

#[test]
fn test_map_write_from_one_member_reaches_every_owner() {
    let c = TestCluster::distributed(&MEMBERS, 2);
    let entries: Vec<(String, i64)> = keys()
        .into_iter()
        .enumerate()
        .map(|(i, k)| (k, i as i64))
        .collect();

    c.grid("d").put_all(entries.iter().map(|(k, v)| (k.as_str(), *v))).unwrap();

    for (key, value) in &entries {
        assert_eq!(sorted(c.holders(key)), sorted(c.grid("d").owners(key.as_str())));
        assert_eq!(c.grid("a").get(key.as_str()).unwrap(), int(*value));
    }
    assert_eq!(c.locks_held(), 0);
}

#[test]
fn test_concurrent_writers_converge_on_owners() {
    const ROUNDS: i64 = 50;
    let c = Arc::new(TestCluster::distributed(&MEMBERS, 2));
    let key = foreign_key(&c, "d");

    for round in 0..ROUNDS {
        let barrier = Arc::new(Barrier::new(MEMBERS.len()));
        let handles: Vec<_> = MEMBERS
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let c = Arc::clone(&c);
                let key = key.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    c.grid(name).put(key.as_str(), round * 10 + i as i64).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let owners = c.grid("a").owners(key.as_str());
        let values: Vec<_> = owners
            .iter()
            .map(|o| c.grid(o.name()).node().container().peek(&Key::from(key.as_str())))
            .map(|e| e.map(|e| (e.version().cloned(), e.value)))
            .collect();
        assert!(
            values.iter().all(|v| v.is_some() && *v == values[0]),
            "round {}: owners disagree: {:?}",
            round,
            values
        );
    }
    assert_eq!(c.locks_held(), 0);
}
