//! Cluster Test Suite
//!
//! Runs several members in one process over a `LocalCluster` and checks the
//! grid end to end: replication, ownership, partitions, write skew, lock
//! ordering under contention, persistence and configuration.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test cluster
//!
//! # Partition tests only
//! cargo test --test cluster partition::
//! ```

use gridkv::prelude::*;
use gridkv::Address;
use std::sync::Once;

pub mod config;
pub mod distributed;
pub mod locking;
pub mod one_phase;
pub mod partition;
pub mod persistence;
pub mod replicated;
pub mod write_skew;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

static TRACING: Once = Once::new();

/// Route grid logs to the test output
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Members of one in-process cluster
pub struct TestCluster {
    pub cluster: LocalCluster,
    pub names: Vec<&'static str>,
    pub grids: Vec<Grid>,
}

impl TestCluster {
    /// Start `names` with `config` and install a view containing all of them
    pub fn start(names: &[&'static str], config: GridConfig) -> Self {
        init_tracing();
        let cluster = LocalCluster::new();
        let grids = names
            .iter()
            .map(|name| {
                Grid::builder()
                    .config(config.clone())
                    .transport(cluster.transport(name))
                    .build()
                    .unwrap()
            })
            .collect();
        cluster.install_view(names, false);
        Self {
            cluster,
            names: names.to_vec(),
            grids,
        }
    }

    /// Replicated cluster
    pub fn replicated(names: &[&'static str]) -> Self {
        Self::start(names, GridConfig::clustered(CacheMode::Replicated))
    }

    /// Distributed cluster keeping `num_owners` copies of each key
    pub fn distributed(names: &[&'static str], num_owners: usize) -> Self {
        let mut config = GridConfig::clustered(CacheMode::Distributed);
        config.clustering.num_owners = num_owners;
        Self::start(names, config)
    }

    /// Member named `name`
    pub fn grid(&self, name: &str) -> &Grid {
        let index = self
            .names
            .iter()
            .position(|n| *n == name)
            .unwrap_or_else(|| panic!("no member named {}", name));
        &self.grids[index]
    }

    /// First of `candidates` whose primary owner is `primary` and that
    /// `outsider` does not own
    pub fn key_owned_by(&self, candidates: &[String], primary: &str, outsider: &str) -> String {
        candidates
            .iter()
            .find(|k| {
                let owners = self.grids[0].owners(k.as_str());
                owners.first() == Some(self.grid(primary).address())
                    && !owners.contains(self.grid(outsider).address())
            })
            .cloned()
            .unwrap_or_else(|| panic!("no candidate key owned by {} but not {}", primary, outsider))
    }

    /// Value of `key` in the memory of every member, in member order
    pub fn copies(&self, key: &str) -> Vec<Option<Value>> {
        self.grids
            .iter()
            .map(|g| g.node().container().peek(&Key::from(key)).map(|e| e.value))
            .collect()
    }

    /// Members holding `key` in memory
    pub fn holders(&self, key: &str) -> Vec<Address> {
        self.grids
            .iter()
            .filter(|g| g.node().container().contains_key(&Key::from(key)))
            .map(|g| g.address().clone())
            .collect()
    }

    /// Total locks held across the cluster
    pub fn locks_held(&self) -> usize {
        self.grids.iter().map(|g| g.stats().locks_held).sum()
    }

    /// Total live transactions across the cluster
    pub fn live_transactions(&self) -> usize {
        self.grids
            .iter()
            .map(|g| {
                let stats = g.stats().transactions;
                stats.local + stats.remote
            })
            .sum()
    }
}

/// Shorthand for an integer value
pub fn int(v: i64) -> Option<Value> {
    Some(Value::Int(v))
}
