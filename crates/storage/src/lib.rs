//! Storage layer for the data grid
//!
//! This crate implements the in-memory data container every member keeps:
//! - DataContainer: DashMap-sharded map from key to stored entry
//! - Lazy expiration on read, explicit purge of expired entries
//! - Snapshot of keys for whole-container operations (clear, preload)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;

pub use container::DataContainer;
