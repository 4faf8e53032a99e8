//! Grid configuration
//!
//! A [`GridConfig`] is read from TOML and validated before a node is built.
//! Every section is optional; missing keys take the defaults below.
//!
//! ```toml
//! [clustering]
//! mode = "distributed"
//! num_owners = 2
//!
//! [locking]
//! acquisition_timeout_ms = 10000
//! concurrency_level = 32
//!
//! [transaction]
//! enabled = true
//! one_phase_commit = false
//! write_skew_check = false
//!
//! [versioning]
//! enabled = false
//!
//! [partition_handling]
//! enabled = false
//! min_nodes_for_primary_partition = 3
//! auto_recover_on_merge = false
//!
//! [persistence]
//! enabled = true
//! shared = false
//! preload = false
//! purge_on_startup = false
//! ```
//!
//! Enabling `write_skew_check` turns versioning on and one-phase commit off:
//! the check runs during prepare, which one-phase commit folds into commit.

use gridkv_core::{Error, Result};
use gridkv_distribution::CacheMode;
use gridkv_persistence::PersistenceSettings;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Cluster membership and ownership
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// How keys map to members
    pub mode: CacheMode,
    /// Owners per key in distributed mode
    pub num_owners: usize,
    /// Ring positions per member
    pub virtual_nodes: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Local,
            num_owners: 2,
            virtual_nodes: 1,
        }
    }
}

/// Lock table settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Lock acquisition deadline in milliseconds
    pub acquisition_timeout_ms: u64,
    /// Number of lock stripes
    pub concurrency_level: usize,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            acquisition_timeout_ms: 10_000,
            concurrency_level: 32,
        }
    }
}

/// Transaction settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Whether `begin()` is allowed
    pub enabled: bool,
    /// Fold commit into prepare
    pub one_phase_commit: bool,
    /// Reject prepares whose reads went stale
    pub write_skew_check: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            one_phase_commit: false,
            write_skew_check: false,
        }
    }
}

/// Entry versioning
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Stamp writes with vector clocks
    pub enabled: bool,
}

/// Partition handling settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PartitionHandlingConfig {
    /// Whether the node refuses operations while partitioned
    pub enabled: bool,
    /// Quorum threshold
    pub min_nodes_for_primary_partition: usize,
    /// Return to normal on a merge view without waiting for confirmation
    pub auto_recover_on_merge: bool,
}

impl Default for PartitionHandlingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_nodes_for_primary_partition: 3,
            auto_recover_on_merge: false,
        }
    }
}

/// Complete node configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Clustering
    pub clustering: ClusteringConfig,
    /// Locking
    pub locking: LockingConfig,
    /// Transactions
    pub transaction: TransactionConfig,
    /// Versioning
    pub versioning: VersioningConfig,
    /// Partition handling
    pub partition_handling: PartitionHandlingConfig,
    /// Persistence
    pub persistence: PersistenceSettings,
}

impl GridConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: GridConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validated()
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Check the settings for values no node can run with
    pub fn validate(&self) -> Result<()> {
        if self.clustering.num_owners == 0 {
            return Err(Error::Config("clustering.num_owners must be at least 1".into()));
        }
        if self.clustering.virtual_nodes == 0 {
            return Err(Error::Config("clustering.virtual_nodes must be at least 1".into()));
        }
        if self.locking.concurrency_level == 0 {
            return Err(Error::Config("locking.concurrency_level must be at least 1".into()));
        }
        if self.partition_handling.enabled
            && self.partition_handling.min_nodes_for_primary_partition == 0
        {
            return Err(Error::Config(
                "partition_handling.min_nodes_for_primary_partition must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Validate and resolve settings implied by others
    pub fn validated(mut self) -> Result<Self> {
        self.validate()?;
        if self.transaction.write_skew_check {
            if !self.versioning.enabled {
                warn!("write skew check requires versioning, enabling it");
                self.versioning.enabled = true;
            }
            if self.transaction.one_phase_commit {
                warn!("write skew check is incompatible with one-phase commit, disabling it");
                self.transaction.one_phase_commit = false;
            }
        }
        Ok(self)
    }

    /// Lock acquisition deadline
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.locking.acquisition_timeout_ms)
    }

    /// Configuration for a member of a cluster in `mode`
    pub fn clustered(mode: CacheMode) -> Self {
        Self {
            clustering: ClusteringConfig {
                mode,
                ..ClusteringConfig::default()
            },
            ..Self::default()
        }
    }
}
