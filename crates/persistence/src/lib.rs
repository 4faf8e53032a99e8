//! Persistence layer for the data grid
//!
//! This crate defines how the grid reaches external stores:
//! - CacheLoader / BulkCacheLoader: the collaborator interfaces
//! - KeyFilter: predicates for bulk loads, including ownership filters
//! - ChainingLoader: several loaders acting as one
//! - LoaderManager: lifecycle, preload and runtime removal of loaders
//! - InMemoryStore: DashMap-backed store for tests and embedding

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chaining;
pub mod filter;
pub mod loader;
pub mod manager;
pub mod memory;

pub use chaining::ChainingLoader;
pub use filter::{OwnerFilter, PrimaryOwnerFilter};
pub use loader::{AcceptAll, BulkCacheLoader, CacheLoader, KeyFilter, Limit};
pub use manager::{LoaderManager, PersistenceSettings};
pub use memory::{InMemoryStore, StoreCalls};
