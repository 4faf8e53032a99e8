//! Public error type
//!
//! Wraps the pipeline's error taxonomy in a stable enum for embedders.

use thiserror::Error;

/// All gridkv errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A lock was not acquired in time
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// A value read by the transaction changed before it committed
    #[error("write skew: {0}")]
    WriteSkew(String),

    /// The member is partitioned away from the cluster majority
    #[error("partitioned: {0}")]
    Partitioned(String),

    /// The transaction was rolled back by the grid
    #[error("rolled back: {0}")]
    RolledBack(String),

    /// Operation not allowed in the transaction's current state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Store failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A member could not be reached
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Encoding or decoding failure
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for gridkv operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if retrying the transaction may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout(_) | Error::WriteSkew(_))
    }

    /// Check if this is a lock timeout
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Error::LockTimeout(_))
    }

    /// Check if this is a write skew
    pub fn is_write_skew(&self) -> bool {
        matches!(self, Error::WriteSkew(_))
    }

    /// Check if the operation was refused because of a partition
    pub fn is_partitioned(&self) -> bool {
        matches!(self, Error::Partitioned(_))
    }
}

impl From<gridkv_core::Error> for Error {
    fn from(e: gridkv_core::Error) -> Self {
        use gridkv_core::Error as CoreError;
        let message = e.to_string();
        match e {
            CoreError::LockTimeout { .. } => Error::LockTimeout(message),
            CoreError::WriteSkew { .. } => Error::WriteSkew(message),
            CoreError::NetworkPartition { .. } => Error::Partitioned(message),
            CoreError::RolledBack { .. } => Error::RolledBack(message),
            CoreError::IllegalTransactionState(msg) => Error::IllegalState(msg),
            CoreError::Persistence(msg) => Error::Persistence(msg),
            CoreError::Transport(msg) => Error::Transport(msg),
            CoreError::InvalidArgument(msg) => Error::InvalidArgument(msg),
            CoreError::Config(msg) => Error::Config(msg),
            CoreError::Serialization(msg) => Error::Serialization(msg),
            CoreError::UnknownCommand(_) => Error::Serialization(message),
        }
    }
}
