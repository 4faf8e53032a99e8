//! # gridkv
//!
//! Embeddable clustered transactional key-value data grid.
//!
//! Members keep entries in memory and replicate them to the members that own
//! them: every member in replicated mode, a fixed number chosen by a
//! consistent hash ring in distributed mode. Transactions buffer their writes
//! and commit them with a two-phase protocol under optimistic locking.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gridkv::prelude::*;
//!
//! let grid = Grid::local()?;
//! grid.put("user:1", "alice")?;
//!
//! let tx = grid.begin()?;
//! let name = tx.get("user:1")?;
//! tx.put("user:2", "bob")?;
//! tx.commit()?;
//! ```
//!
//! ## Clusters
//!
//! A [`LocalCluster`] hosts several members in one process:
//!
//! ```ignore
//! let cluster = LocalCluster::new();
//! let config = GridConfig::clustered(CacheMode::Replicated);
//! let a = Grid::builder().config(config.clone()).transport(cluster.transport("a")).build()?;
//! let b = Grid::builder().config(config).transport(cluster.transport("b")).build()?;
//! cluster.install_view(&["a", "b"], false);
//!
//! a.put("k", 1i64)?;
//! assert_eq!(b.get("k")?, Some(Value::Int(1)));
//! ```
//!
//! ## Layers
//!
//! - [`gridkv_core`]: keys, values, vector clocks, modifications, errors
//! - [`gridkv_distribution`]: views and the consistent hash ring
//! - [`gridkv_storage`]: the in-memory data container
//! - [`gridkv_concurrency`]: contexts, transactions and the lock table
//! - [`gridkv_persistence`]: cache loaders
//! - [`gridkv_engine`]: the interceptor pipeline and the member

#![warn(missing_docs)]

mod error;
mod grid;

pub mod prelude;

pub use error::{Error, Result};
pub use grid::{Grid, GridBuilder, Transaction};

pub use gridkv_concurrency::TxStatus;
pub use gridkv_core::{Address, Delta, InternalCacheEntry, Key, Metadata, Value};
pub use gridkv_distribution::{CacheMode, ClusterView};
pub use gridkv_engine::{GridConfig, LocalCluster, NodeStats, PartitionState};

pub use gridkv_concurrency;
pub use gridkv_core;
pub use gridkv_distribution;
pub use gridkv_engine;
pub use gridkv_persistence;
pub use gridkv_storage;
