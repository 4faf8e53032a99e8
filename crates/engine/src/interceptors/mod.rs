//! Pipeline stages
//!
//! | Stage | Role |
//! |-------|------|
//! | [`PartitionHandlingInterceptor`] | refuses work while below quorum |
//! | [`TxInterceptor`] | transaction state machine and table bookkeeping |
//! | [`OptimisticLockingInterceptor`] | ordered lock acquisition at prepare |
//! | [`DistributionInterceptor`] | remote reads, replication, 2PC fan-out |
//! | [`VersioningInterceptor`] | write-skew check and version stamping |
//! | [`CacheStoreInterceptor`] | write-through to the persistence collaborator |
//! | [`CallInterceptor`] | applies commands to contexts and the container |

pub mod call;
pub mod distribution;
pub mod locking;
pub mod partition;
pub mod store;
pub mod tx;
pub mod versioning;

pub use call::CallInterceptor;
pub use distribution::DistributionInterceptor;
pub use locking::{lock_order, sort_for_locking, OptimisticLockingInterceptor};
pub use partition::{PartitionDecision, PartitionHandler, PartitionHandlingInterceptor, PartitionState};
pub use store::{CacheStoreInterceptor, StoreStats};
pub use tx::TxInterceptor;
pub use versioning::VersioningInterceptor;

use gridkv_concurrency::{CacheTransaction, InvocationContext};
use gridkv_core::{Error, Flag, FlagSet, Result};
use std::sync::Arc;

/// Transaction of a context that must be transactional
pub(crate) fn tx_of(ctx: &InvocationContext) -> Result<Arc<CacheTransaction>> {
    ctx.transaction().cloned().ok_or_else(|| {
        Error::IllegalTransactionState("command requires a transactional context".into())
    })
}

/// Check if a non-transactional write is a copy of one already applied by
/// the key's primary owner
///
/// Copies arrive from another member with `CacheModeLocal` set. Everything
/// else is decided here: the condition of a replace, the new versions and
/// the shared store write.
pub(crate) fn is_replica_copy(ctx: &InvocationContext, flags: FlagSet) -> bool {
    !ctx.is_origin_local() && flags.contains(Flag::CacheModeLocal)
}
