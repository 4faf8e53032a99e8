//! Transaction table
//!
//! Registry of the live transactions on one member, local and remote,
//! keyed by global id. Other components change transactions in bulk by
//! sending a [`TableMessage`] instead of reaching into the table, which keeps
//! side effects such as partition-forced rollbacks in one auditable place.

use crate::transaction::{CacheTransaction, TxOrigin};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gridkv_core::{Address, GlobalTransaction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Bulk request addressed to the transaction table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableMessage {
    /// Mark every live transaction for forced rollback
    MarkAllForRollback {
        /// Reason reported to the transactions' owners
        reason: String,
    },
}

/// Counters of the table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Live local transactions
    pub local: usize,
    /// Live remote transactions
    pub remote: usize,
    /// Transactions removed after commit
    pub committed: u64,
    /// Transactions removed after rollback
    pub rolled_back: u64,
}

/// Live transactions of one member
#[derive(Debug)]
pub struct TransactionTable {
    local_address: Address,
    next_id: AtomicU64,
    local: DashMap<GlobalTransaction, Arc<CacheTransaction>>,
    remote: DashMap<GlobalTransaction, Arc<CacheTransaction>>,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl TransactionTable {
    /// Create an empty table for the given member
    pub fn new(local_address: Address) -> Self {
        Self {
            local_address,
            next_id: AtomicU64::new(1),
            local: DashMap::new(),
            remote: DashMap::new(),
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
        }
    }

    /// Start a local transaction
    pub fn create_local(&self, view_id: u64) -> Arc<CacheTransaction> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let gtx = GlobalTransaction::new(self.local_address.clone(), id);
        let tx = Arc::new(CacheTransaction::new(gtx.clone(), TxOrigin::Local, view_id));
        self.local.insert(gtx, Arc::clone(&tx));
        debug!(gtx = %tx.gtx(), view_id, "local transaction created");
        tx
    }

    /// Remote transaction for `gtx`, created if missing
    ///
    /// Returns the transaction and whether it already existed.
    pub fn get_or_create_remote(
        &self,
        gtx: &GlobalTransaction,
        view_id: u64,
    ) -> (Arc<CacheTransaction>, bool) {
        match self.remote.entry(gtx.clone()) {
            Entry::Occupied(e) => (Arc::clone(e.get()), true),
            Entry::Vacant(e) => {
                let tx = Arc::new(CacheTransaction::new(gtx.clone(), TxOrigin::Remote, view_id));
                e.insert(Arc::clone(&tx));
                debug!(gtx = %gtx, view_id, "remote transaction created");
                (tx, false)
            }
        }
    }

    /// Local transaction for `gtx`
    pub fn get_local(&self, gtx: &GlobalTransaction) -> Option<Arc<CacheTransaction>> {
        self.local.get(gtx).map(|e| Arc::clone(e.value()))
    }

    /// Remote transaction for `gtx`
    pub fn get_remote(&self, gtx: &GlobalTransaction) -> Option<Arc<CacheTransaction>> {
        self.remote.get(gtx).map(|e| Arc::clone(e.value()))
    }

    /// Transaction for `gtx`, local first
    pub fn get(&self, gtx: &GlobalTransaction) -> Option<Arc<CacheTransaction>> {
        self.get_local(gtx).or_else(|| self.get_remote(gtx))
    }

    /// Remove a finished transaction and count its outcome
    pub fn remove(&self, gtx: &GlobalTransaction, committed: bool) -> Option<Arc<CacheTransaction>> {
        let removed = self
            .local
            .remove(gtx)
            .or_else(|| self.remote.remove(gtx))
            .map(|(_, tx)| tx);
        if removed.is_some() {
            let counter = if committed {
                &self.committed
            } else {
                &self.rolled_back
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Snapshot of local transactions
    pub fn local_transactions(&self) -> Vec<Arc<CacheTransaction>> {
        self.local.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Snapshot of remote transactions
    pub fn remote_transactions(&self) -> Vec<Arc<CacheTransaction>> {
        self.remote.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Snapshot of every transaction started in a view older than `view_id`
    pub fn older_than(&self, view_id: u64) -> Vec<Arc<CacheTransaction>> {
        self.local
            .iter()
            .chain(self.remote.iter())
            .filter(|e| e.value().view_id() < view_id)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Apply a bulk request, returning how many transactions it touched
    pub fn handle(&self, message: TableMessage) -> usize {
        match message {
            TableMessage::MarkAllForRollback { reason } => {
                let mut marked = 0;
                for tx in self.local_transactions().into_iter().chain(self.remote_transactions()) {
                    tx.mark_for_rollback(reason.clone());
                    marked += 1;
                }
                info!(marked, reason = %reason, "transactions marked for rollback");
                marked
            }
        }
    }

    /// Counters
    pub fn stats(&self) -> TableStats {
        TableStats {
            local: self.local.len(),
            remote: self.remote.len(),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
        }
    }
}
