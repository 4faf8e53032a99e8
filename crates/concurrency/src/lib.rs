//! Concurrency control for the data grid
//!
//! This crate implements the per-member transaction machinery:
//! - LockManager: striped per-key lock table with timed acquisition
//! - CacheTransaction: write-set, locks and versions of one transaction
//! - CompletionSignal: two-tier wait/notify for lock release
//! - TransactionTable: registry of live local and remote transactions
//! - InvocationContext: per-operation scratch space for the pipeline

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod completion;
pub mod context;
pub mod lock;
pub mod table;
pub mod transaction;

pub use completion::CompletionSignal;
pub use context::{ContextFactory, InvocationContext};
pub use lock::{LockManager, LockOwner};
pub use table::{TableMessage, TableStats, TransactionTable};
pub use transaction::{CacheTransaction, TxOrigin, TxSnapshot, TxStatus};
