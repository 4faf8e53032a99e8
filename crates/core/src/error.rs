//! Error types for the data grid
//!
//! One variant per failure kind the transactional pipeline can surface.
//! Errors are `Serialize` so that a failure raised on a remote member travels
//! back to the originator and is re-raised there with the same kind.
//!
//! | Variant | Recoverable | Effect |
//! |---------|-------------|--------|
//! | `LockTimeout` | yes | requesting transaction rolls back |
//! | `WriteSkew` | yes | transaction rolls back, client may retry |
//! | `NetworkPartition` | no | operation refused |
//! | `IllegalTransactionState` | no | protocol or configuration error |
//! | `Persistence` | no | propagated after tracking cleanup |

use crate::key::Key;
use crate::types::GlobalTransaction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for grid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for grid operations
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Error {
    /// Lock not acquired within the deadline
    #[error("unable to acquire lock on {key} within {timeout_ms}ms (held by {holder})")]
    LockTimeout {
        /// Key whose lock was requested
        key: Key,
        /// Description of the current holder
        holder: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// The version observed by a transaction is no longer the current one
    #[error("write skew detected on key {key}: {detail}")]
    WriteSkew {
        /// Key whose version changed
        key: Key,
        /// Observed and current versions
        detail: String,
    },

    /// Member count fell below the quorum threshold
    #[error("cluster is partitioned ({members} members, quorum {quorum}); operation refused")]
    NetworkPartition {
        /// Members in the current view
        members: usize,
        /// Minimum members for the primary partition
        quorum: usize,
    },

    /// Protocol violation
    #[error("illegal transaction state: {0}")]
    IllegalTransactionState(String),

    /// Persistence collaborator failure
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Invalid argument passed to an operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transaction was marked for forced rollback
    #[error("transaction {gtx} was rolled back: {reason}")]
    RolledBack {
        /// The transaction
        gtx: GlobalTransaction,
        /// Why the rollback was forced
        reason: String,
    },

    /// Transport failure talking to another member
    #[error("transport error: {0}")]
    Transport(String),

    /// Encoding or decoding failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unknown command id on the wire
    #[error("unknown command id {0}")]
    UnknownCommand(u8),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this error is retryable
    ///
    /// Lock timeouts and write skews may succeed when the transaction is
    /// retried against fresh data.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. } | Error::WriteSkew { .. })
    }

    /// Check if this is a lock timeout
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }

    /// Check if this is a write skew conflict
    pub fn is_write_skew(&self) -> bool {
        matches!(self, Error::WriteSkew { .. })
    }

    /// Check if this operation was refused because of a partition
    pub fn is_network_partition(&self) -> bool {
        matches!(self, Error::NetworkPartition { .. })
    }

    /// Check if this indicates a programming or configuration error
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            Error::IllegalTransactionState(_) | Error::Config(_) | Error::UnknownCommand(_)
        )
    }
}
