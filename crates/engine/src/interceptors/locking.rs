//! Optimistic locking
//!
//! Transactions take no locks while they run. At prepare, every key of the
//! write-set is locked in one pass, in the order given by [`lock_order`].
//! Two transactions sharing keys therefore request the shared keys in the
//! same relative order, and cannot wait on each other in a cycle.
//!
//! Per key:
//! - primary owner: wait for transactions from an older view still holding
//!   the key, then lock it
//! - backup owner: record a backup lock on the transaction
//! - not an owner: nothing
//!
//! A clear in the write-set locks every key in the container instead, in
//! container order.
//!
//! A non-transactional write holds its keys' locks on their primary owner
//! while it is applied there and copied to the other owners. The copies
//! take no lock.
//!
//! Whatever happens after a lock is taken, the transaction's locks are
//! released before an error leaves this stage.

use super::{is_replica_copy, tx_of};
use crate::command::{Command, PrepareCommand, Response};
use crate::interceptor::{Interceptor, Next};
use gridkv_concurrency::{CacheTransaction, InvocationContext, LockManager, TransactionTable};
use gridkv_core::{Error, Flag, Key, KeyCollection, Modification, ModificationCollection, Result};
use gridkv_distribution::Ownership;
use gridkv_storage::DataContainer;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use xxhash_rust::xxh3::xxh3_64;

/// Position of `key` in the global lock acquisition order
///
/// Keys are ordered by the xxh3 hash of their bytes, ties broken by the
/// bytes themselves, so the order is total and identical on every member.
pub fn lock_order(key: &Key) -> (u64, Key) {
    (xxh3_64(key.as_bytes()), key.clone())
}

/// Sort keys into lock acquisition order
pub fn sort_for_locking(keys: &mut KeyCollection) {
    if keys.len() > 1 {
        keys.sort_by_key(lock_order);
    }
}

/// Lock acquisition at prepare, release at commit and rollback
pub struct OptimisticLockingInterceptor {
    locks: Arc<LockManager>,
    ownership: Arc<Ownership>,
    table: Arc<TransactionTable>,
    container: Arc<DataContainer>,
    timeout: Duration,
}

impl OptimisticLockingInterceptor {
    /// Create with the member's lock table and a lock acquisition timeout
    pub fn new(
        locks: Arc<LockManager>,
        ownership: Arc<Ownership>,
        table: Arc<TransactionTable>,
        container: Arc<DataContainer>,
        timeout: Duration,
    ) -> Self {
        Self {
            locks,
            ownership,
            table,
            container,
            timeout,
        }
    }

    fn timeout_for<'a>(&self, modifications: impl IntoIterator<Item = &'a Modification>) -> Duration {
        let zero = modifications
            .into_iter()
            .any(|m| m.flags().contains(Flag::ZeroLockAcquisitionTimeout));
        if zero {
            Duration::ZERO
        } else {
            self.timeout
        }
    }

    /// Keys a write-set must lock, in acquisition order
    fn keys_to_lock(&self, modifications: &ModificationCollection) -> KeyCollection {
        let locking: Vec<&Modification> = modifications
            .iter()
            .filter(|m| !m.flags().contains(Flag::SkipLocking))
            .collect();

        let mut keys = KeyCollection::new();
        if locking.iter().any(|m| m.is_clear()) {
            for key in self.container.keys() {
                keys.add(key);
            }
            for m in &locking {
                keys.add_all(&m.affected_keys());
            }
            debug!(keys = keys.len(), "clear in write-set, locking the whole container");
            return keys;
        }

        for m in &locking {
            keys.add_all(&m.affected_keys());
            if let Modification::ApplyDelta { composite_keys, .. } = m {
                keys.add_all(composite_keys.iter().filter(|k| self.ownership.is_owner(k)));
            }
        }
        sort_for_locking(&mut keys);
        keys
    }

    fn wait_for_older(&self, tx: &CacheTransaction, key: &Key, deadline: Instant) -> Result<()> {
        for older in self.table.older_than(tx.view_id()) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !older.wait_for_lock_release(key, remaining) {
                return Err(Error::LockTimeout {
                    key: key.clone(),
                    holder: older.gtx().to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    fn lock_write_set(
        &self,
        ctx: &mut InvocationContext,
        tx: &CacheTransaction,
        keys: &KeyCollection,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        for key in keys {
            tx.check_not_marked()?;
            if !self.ownership.is_owner(key) {
                continue;
            }
            if !self.ownership.is_primary_owner(key) {
                trace!(gtx = %tx.gtx(), key = %key, "registering backup lock");
                tx.register_backup_lock(key.clone());
                continue;
            }
            self.wait_for_older(tx, key, deadline)?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.locks.acquire(key, ctx.lock_owner(), remaining)?;
            ctx.add_locked_key(key.clone())?;
            tx.check_not_marked()?;
        }
        tx.add_affected_keys(keys);
        Ok(())
    }

    fn lock_keys(&self, ctx: &mut InvocationContext, keys: &KeyCollection, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        for key in keys {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.locks.acquire(key, ctx.lock_owner(), remaining)?;
            ctx.add_locked_key(key.clone())?;
        }
        Ok(())
    }

    fn release(&self, ctx: &mut InvocationContext) {
        let keys = ctx.take_locked_keys();
        let released = self.locks.release_all(&keys, ctx.lock_owner());
        if let Some(tx) = ctx.transaction() {
            tx.take_backup_locks();
        }
        if released > 0 {
            trace!(owner = %ctx.lock_owner(), released, "locks released");
        }
    }

    fn prepare(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        prepare: &PrepareCommand,
        next: Next<'_>,
    ) -> Result<Response> {
        let tx = tx_of(ctx)?;
        let keys = self.keys_to_lock(&prepare.modifications);
        let timeout = self.timeout_for(prepare.modifications.iter());
        debug!(gtx = %tx.gtx(), keys = keys.len(), "acquiring write-set locks");

        let outcome = self
            .lock_write_set(ctx, &tx, &keys, timeout)
            .and_then(|()| next.invoke(ctx, command));
        if outcome.is_err() {
            self.release(ctx);
        }
        outcome
    }

    fn finish(&self, ctx: &mut InvocationContext, command: &Command, next: Next<'_>) -> Result<Response> {
        let outcome = next.invoke(ctx, command);
        self.release(ctx);
        if let Some(tx) = ctx.transaction() {
            tx.notify_on_transaction_finished();
        }
        outcome
    }

    fn non_tx_write(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        modification: &Modification,
        next: Next<'_>,
    ) -> Result<Response> {
        if is_replica_copy(ctx, modification.flags())
            || modification.is_clear()
            || modification.flags().contains(Flag::SkipLocking)
        {
            return next.invoke(ctx, command);
        }
        // Writes to keys owned elsewhere are forwarded to their primary,
        // which takes the lock there
        let mut keys: KeyCollection = modification
            .affected_keys()
            .into_iter()
            .filter(|k| self.ownership.is_primary_owner(k))
            .collect();
        sort_for_locking(&mut keys);
        let timeout = self.timeout_for([modification]);

        let outcome = self
            .lock_keys(ctx, &keys, timeout)
            .and_then(|()| next.invoke(ctx, command));
        self.release(ctx);
        outcome
    }
}

impl Interceptor for OptimisticLockingInterceptor {
    fn name(&self) -> &'static str {
        "locking"
    }

    fn handle(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        next: Next<'_>,
    ) -> Result<Response> {
        match command {
            Command::LockControl(_) | Command::MultiKeyLockControl(_) => Err(
                Error::IllegalTransactionState(
                    "explicit locking is not allowed with optimistic caches".into(),
                ),
            ),
            Command::Prepare(p) | Command::VersionedPrepare { prepare: p, .. } => {
                self.prepare(ctx, command, p, next)
            }
            Command::Commit { .. } | Command::VersionedCommit { .. } | Command::Rollback { .. } => {
                self.finish(ctx, command, next)
            }
            Command::Write { .. } if ctx.is_in_tx_scope() => {
                let outcome = next.invoke(ctx, command);
                if outcome.is_err() {
                    self.release(ctx);
                }
                outcome
            }
            Command::Write { modification, .. } => self.non_tx_write(ctx, command, modification, next),
            _ => next.invoke(ctx, command),
        }
    }
}

impl fmt::Debug for OptimisticLockingInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticLockingInterceptor")
            .field("timeout", &self.timeout)
            .field("locks", &self.locks)
            .finish()
    }
}
