//! Recovery collaborator
//!
//! A participant asked to prepare a transaction it already prepared, for
//! example after the originator retried, must not prepare it twice. The
//! [`RecoveryManager`] answers whether that is the case.

use dashmap::DashSet;
use gridkv_core::GlobalTransaction;
use tracing::trace;

/// Knows which transactions are prepared on this member
pub trait RecoveryManager: Send + Sync {
    /// Check if `gtx` is already prepared here
    fn is_prepared(&self, gtx: &GlobalTransaction) -> bool;

    /// Remember that `gtx` prepared here
    fn record_prepared(&self, _gtx: &GlobalTransaction) {}

    /// Forget `gtx` once it committed or rolled back
    fn forget(&self, _gtx: &GlobalTransaction) {}
}

/// Recovery manager that never reports a prepared transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecovery;

impl RecoveryManager for NoRecovery {
    fn is_prepared(&self, _gtx: &GlobalTransaction) -> bool {
        false
    }
}

/// In-memory log of remotely prepared transactions
#[derive(Debug, Default)]
pub struct PreparedTransactionLog {
    prepared: DashSet<GlobalTransaction>,
}

impl PreparedTransactionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepared transactions not yet completed
    pub fn in_doubt(&self) -> Vec<GlobalTransaction> {
        let mut gtxs: Vec<_> = self.prepared.iter().map(|g| g.key().clone()).collect();
        gtxs.sort();
        gtxs
    }

    /// Number of in-doubt transactions
    pub fn len(&self) -> usize {
        self.prepared.len()
    }

    /// Check if no transaction is in doubt
    pub fn is_empty(&self) -> bool {
        self.prepared.is_empty()
    }
}

impl RecoveryManager for PreparedTransactionLog {
    fn is_prepared(&self, gtx: &GlobalTransaction) -> bool {
        self.prepared.contains(gtx)
    }

    fn record_prepared(&self, gtx: &GlobalTransaction) {
        trace!(%gtx, "recording prepared transaction");
        self.prepared.insert(gtx.clone());
    }

    fn forget(&self, gtx: &GlobalTransaction) {
        self.prepared.remove(gtx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridkv_core::Address;

    #[test]
    fn test_log_tracks_until_forgotten() {
        let log = PreparedTransactionLog::new();
        let a = GlobalTransaction::new(Address::new("a"), 2);
        let b = GlobalTransaction::new(Address::new("a"), 1);
        assert!(!log.is_prepared(&a));
        log.record_prepared(&a);
        log.record_prepared(&b);
        log.record_prepared(&a);
        assert!(log.is_prepared(&a));
        assert_eq!(log.in_doubt(), vec![b.clone(), a.clone()]);
        log.forget(&a);
        assert!(!log.is_prepared(&a));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_no_recovery_never_prepared() {
        let gtx = GlobalTransaction::new(Address::new("a"), 1);
        NoRecovery.record_prepared(&gtx);
        assert!(!NoRecovery.is_prepared(&gtx));
    }
}
