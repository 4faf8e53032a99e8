//! Core types for the gridkv data grid
//!
//! This crate defines the vocabulary shared by every other layer:
//! - [`Address`] / [`AddressCollection`]: cluster member identities
//! - [`Key`] / [`Value`]: the data model
//! - [`VectorClock`]: immutable per-entry version stamps
//! - [`KeyCollection`], [`ModificationCollection`], [`CacheEntryCollection`]:
//!   the small ordered containers used by contexts and transactions
//! - [`Modification`]: the write operations a transaction records
//! - [`Error`]: the error taxonomy of the grid

#![warn(missing_docs)]

pub mod address;
pub mod collections;
pub mod entry;
pub mod error;
pub mod flags;
pub mod key;
pub mod metadata;
pub mod modification;
pub mod types;
pub mod value;
pub mod version;

pub use address::{Address, AddressCollection};
pub use collections::{CacheEntryCollection, KeyCollection, ModificationCollection};
pub use entry::{CacheEntry, InternalCacheEntry};
pub use error::{Error, Result};
pub use flags::{Flag, FlagSet};
pub use key::Key;
pub use metadata::Metadata;
pub use modification::Modification;
pub use types::GlobalTransaction;
pub use value::{Delta, Value};
pub use version::{
    EntryVersionsMap, VectorClock, VectorClockGenerator, VersionComparison, VersionGenerator,
};
