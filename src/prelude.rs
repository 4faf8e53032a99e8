//! Convenient imports for gridkv
//!
//! ```ignore
//! use gridkv::prelude::*;
//!
//! let grid = Grid::local()?;
//! grid.put("key", "value")?;
//! ```

// Entry points
pub use crate::grid::{Grid, GridBuilder, Transaction};

// Error handling
pub use crate::error::{Error, Result};

// Data model
pub use gridkv_core::{Delta, Key, Metadata, Value};

// Clustering
pub use gridkv_distribution::CacheMode;
pub use gridkv_engine::{GridConfig, LocalCluster, PartitionState};
