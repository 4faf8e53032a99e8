//! Partition Handling Tests
//!
//! A five member replicated cluster with a quorum of three splits into a
//! minority of two and a majority of three, then merges back.

use crate::*;
use gridkv::gridkv_core::{FlagSet, Metadata, Modification};
use gridkv::gridkv_engine::{Command, PrepareCommand};

const ALL: [&str; 5] = ["a", "b", "c", "d", "e"];
const MINORITY: [&str; 2] = ["a", "b"];
const MAJORITY: [&str; 3] = ["c", "d", "e"];

fn partitioned_cluster() -> TestCluster {
    let mut config = GridConfig::clustered(CacheMode::Replicated);
    config.partition_handling.enabled = true;
    config.partition_handling.min_nodes_for_primary_partition = 3;
    TestCluster::start(&ALL, config)
}

fn split(c: &TestCluster) {
    c.cluster.install_view_on(&MINORITY, &MINORITY, false);
    c.cluster.install_view_on(&MAJORITY, &MAJORITY, false);
}

#[test]
fn test_minority_refuses_and_majority_serves() {
    let c = partitioned_cluster();
    assert!(c
        .grids
        .iter()
        .all(|g| g.partition_state() == PartitionState::Normal));

    split(&c);

    for name in MINORITY {
        assert_eq!(c.grid(name).partition_state(), PartitionState::ReadOnly);
        assert!(c.grid(name).put("k", 1i64).unwrap_err().is_partitioned());
        assert!(c.grid(name).get("k").unwrap_err().is_partitioned());
    }
    for name in MAJORITY {
        assert_eq!(c.grid(name).partition_state(), PartitionState::Normal);
    }

    c.grid("c").put("k", 1i64).unwrap();
    assert_eq!(c.grid("e").get("k").unwrap(), int(1));
    assert!(c.grid("a").node().container().is_empty());
}

#[test]
fn test_merge_waits_for_state_transfer() {
    let c = partitioned_cluster();
    split(&c);

    c.cluster.install_view(&ALL, true);

    for name in MINORITY {
        let grid = c.grid(name);
        assert_eq!(grid.partition_state(), PartitionState::AwaitingStateTransfer);
        assert!(grid.get("k").unwrap_err().is_partitioned());
    }
    for name in MAJORITY {
        assert_eq!(c.grid(name).partition_state(), PartitionState::Normal);
    }

    assert!(c.grid("a").confirm_state_transfer());
    assert!(!c.grid("a").confirm_state_transfer());
    assert_eq!(c.grid("a").partition_state(), PartitionState::Normal);
    c.grid("a").put("k", 2i64).unwrap();
    assert_eq!(c.grid("c").get("k").unwrap(), int(2));
}

#[test]
fn test_auto_recovery_on_merge() {
    let mut config = GridConfig::clustered(CacheMode::Replicated);
    config.partition_handling.enabled = true;
    config.partition_handling.min_nodes_for_primary_partition = 3;
    config.partition_handling.auto_recover_on_merge = true;
    let c = TestCluster::start(&ALL, config);
    split(&c);

    c.cluster.install_view(&ALL, true);

    assert!(c
        .grids
        .iter()
        .all(|g| g.partition_state() == PartitionState::Normal));
}

#[test]
fn test_local_transaction_cannot_commit_after_split() {
    let c = partitioned_cluster();
    let tx = c.grid("a").begin().unwrap();
    tx.put("k", 1i64).unwrap();

    split(&c);

    assert!(tx.commit().is_err());
    assert_eq!(c.grid("a").stats().locks_held, 0);
    assert_eq!(c.grid("a").stats().transactions.local, 0);
    assert_eq!(c.copies("k"), vec![None, None, None, None, None]);
}

#[test]
fn test_prepared_remote_transaction_is_rolled_back() {
    let c = partitioned_cluster();
    let node = c.grid("c").node();
    let tx = node.begin();
    node.execute_in(
        &tx,
        &Command::write(Modification::Put {
            key: Key::from("k"),
            value: Value::Int(1),
            metadata: Metadata::new(),
            flags: FlagSet::empty(),
        }),
    )
    .unwrap();
    node.execute_in(
        &tx,
        &Command::Prepare(PrepareCommand {
            gtx: tx.gtx().clone(),
            modifications: tx.modifications(),
            one_phase_commit: false,
        }),
    )
    .unwrap();

    // "a" coordinates the view, so it holds the write-set's lock
    assert_eq!(c.grid("a").stats().locks_held, 1);
    assert_eq!(c.grid("a").stats().transactions.remote, 1);

    split(&c);

    assert_eq!(c.grid("a").stats().locks_held, 0);
    assert_eq!(c.grid("a").stats().transactions.remote, 0);
    assert_eq!(c.grid("b").stats().transactions.remote, 0);

    node.rollback(&tx).unwrap();
    assert_eq!(c.live_transactions(), 0);
    assert_eq!(c.copies("k"), vec![None, None, None, None, None]);
}
