//! Key distribution for the data grid
//!
//! Maps keys to the cluster members that own them:
//! - [`ConsistentHash`]: immutable hash ring built once per view
//! - [`Ownership`]: the current ring plus the cache mode, replaced wholesale
//!   when the view changes
//! - [`ClusterView`] / [`ViewChangedEvent`]: membership snapshots

#![warn(missing_docs)]

pub mod hash;
pub mod ownership;
pub mod ring;
pub mod view;

pub use hash::{hash_address, hash_key};
pub use ownership::{CacheMode, Ownership};
pub use ring::ConsistentHash;
pub use view::{ClusterView, ViewChangedEvent};
