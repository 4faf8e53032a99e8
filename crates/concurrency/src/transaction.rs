//! Cache transactions
//!
//! A [`CacheTransaction`] is the per-member state of one
//! [`GlobalTransaction`]: its write-set, the entries it looked up, the keys
//! it locked, backup locks, and the versions it observed or computed.
//! Exactly one exists per global transaction per member; the originator
//! holds a local one, every other participant a remote one.
//!
//! ## State machine
//!
//! ```text
//! Active ──▶ Preparing ──▶ Prepared ──▶ Committed
//!   │            │             │
//!   └────────────┴─────────────┴──────▶ RolledBack
//! ```
//!
//! ## Lock release signaling
//!
//! Other threads may wait for this transaction to let go of a key
//! ([`CacheTransaction::wait_for_lock_release`]). The completion flag is set
//! by [`CacheTransaction::notify_on_transaction_finished`] after the locks are
//! released, so a woken waiter always finds the key free.
//!
//! ## Thread Safety
//!
//! The thread driving the transaction through the pipeline is the only
//! writer of the data sets. They sit behind a mutex anyway, because lock
//! waiters on other threads read the locked-key and backup-lock sets. The
//! rollback mark and the completion flag are atomics.

use crate::completion::CompletionSignal;
use gridkv_core::{
    Address, AddressCollection, CacheEntry, CacheEntryCollection, EntryVersionsMap, Error,
    GlobalTransaction, Key, KeyCollection, Modification, ModificationCollection, Result,
    VectorClock,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Which member started the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOrigin {
    /// Started on this member
    Local,
    /// Started elsewhere, this member participates
    Remote,
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Executing operations
    Active,
    /// Acquiring locks and validating
    Preparing,
    /// Prepared, waiting for commit or rollback
    Prepared,
    /// Committed
    Committed,
    /// Rolled back
    RolledBack,
}

impl TxStatus {
    /// Check if the transaction finished
    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Committed | TxStatus::RolledBack)
    }

    fn can_transition_to(self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (Active, Preparing)
                | (Preparing, Prepared)
                | (Prepared, Committed)
                | (Active, RolledBack)
                | (Preparing, RolledBack)
                | (Prepared, RolledBack)
        )
    }
}

#[derive(Debug, Clone)]
struct TxData {
    status: TxStatus,
    modifications: ModificationCollection,
    looked_up: CacheEntryCollection,
    locked_keys: KeyCollection,
    backup_locks: KeyCollection,
    affected_keys: KeyCollection,
    updated_versions: EntryVersionsMap,
    versions_seen: EntryVersionsMap,
    participants: AddressCollection,
    rollback_reason: Option<String>,
}

/// Copy of a transaction's state, detached from the live transaction
#[derive(Debug, Clone)]
pub struct TxSnapshot {
    /// Transaction id
    pub gtx: GlobalTransaction,
    /// State at snapshot time
    pub status: TxStatus,
    /// Write-set
    pub modifications: ModificationCollection,
    /// Locked keys
    pub locked_keys: KeyCollection,
    /// Backup locks
    pub backup_locks: KeyCollection,
    /// Keys recorded as affected
    pub affected_keys: KeyCollection,
    /// Versions computed at prepare
    pub updated_versions: EntryVersionsMap,
    /// Versions observed by reads
    pub versions_seen: EntryVersionsMap,
}

/// Per-member state of one global transaction
#[derive(Debug)]
pub struct CacheTransaction {
    gtx: GlobalTransaction,
    origin: TxOrigin,
    view_id: u64,
    data: Mutex<TxData>,
    completion: CompletionSignal,
    marked_for_rollback: AtomicBool,
    one_phase_commit: AtomicBool,
}

impl CacheTransaction {
    /// Create a transaction in the `Active` state
    pub fn new(gtx: GlobalTransaction, origin: TxOrigin, view_id: u64) -> Self {
        Self {
            gtx,
            origin,
            view_id,
            data: Mutex::new(TxData {
                status: TxStatus::Active,
                modifications: ModificationCollection::new(),
                looked_up: CacheEntryCollection::new(),
                locked_keys: KeyCollection::new(),
                backup_locks: KeyCollection::new(),
                affected_keys: KeyCollection::new(),
                updated_versions: EntryVersionsMap::new(),
                versions_seen: EntryVersionsMap::new(),
                participants: AddressCollection::new(),
                rollback_reason: None,
            }),
            completion: CompletionSignal::new(),
            marked_for_rollback: AtomicBool::new(false),
            one_phase_commit: AtomicBool::new(false),
        }
    }

    /// Global id
    pub fn gtx(&self) -> &GlobalTransaction {
        &self.gtx
    }

    /// Origin
    pub fn origin(&self) -> TxOrigin {
        self.origin
    }

    /// Check if started on this member
    pub fn is_local(&self) -> bool {
        self.origin == TxOrigin::Local
    }

    /// Topology version when the transaction started
    pub fn view_id(&self) -> u64 {
        self.view_id
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Current state
    pub fn status(&self) -> TxStatus {
        self.data.lock().status
    }

    /// Move to `next`
    ///
    /// Rolling back an already rolled back transaction is accepted, so a
    /// retried rollback does not fail. Any other transition outside the
    /// state machine is an `IllegalTransactionState`.
    pub fn transition(&self, next: TxStatus) -> Result<()> {
        let mut data = self.data.lock();
        if data.status == TxStatus::RolledBack && next == TxStatus::RolledBack {
            return Ok(());
        }
        if !data.status.can_transition_to(next) {
            return Err(Error::IllegalTransactionState(format!(
                "{} cannot move from {:?} to {:?}",
                self.gtx, data.status, next
            )));
        }
        debug!(gtx = %self.gtx, from = ?data.status, to = ?next, "transaction state change");
        data.status = next;
        Ok(())
    }

    /// Check if the transaction passed prepare
    pub fn is_prepared(&self) -> bool {
        matches!(self.status(), TxStatus::Prepared | TxStatus::Committed)
    }

    /// Request a forced rollback
    ///
    /// Safe from any thread. The driving thread observes the mark before its
    /// next lock acquisition, prepare or commit.
    pub fn mark_for_rollback(&self, reason: impl Into<String>) {
        let mut data = self.data.lock();
        if data.rollback_reason.is_none() {
            data.rollback_reason = Some(reason.into());
        }
        self.marked_for_rollback.store(true, Ordering::SeqCst);
    }

    /// Check for a forced rollback request
    pub fn is_marked_for_rollback(&self) -> bool {
        self.marked_for_rollback.load(Ordering::SeqCst)
    }

    /// Fail with `RolledBack` if a forced rollback was requested
    pub fn check_not_marked(&self) -> Result<()> {
        if !self.is_marked_for_rollback() {
            return Ok(());
        }
        let reason = self
            .data
            .lock()
            .rollback_reason
            .clone()
            .unwrap_or_else(|| "marked for rollback".to_string());
        Err(Error::RolledBack {
            gtx: self.gtx.clone(),
            reason,
        })
    }

    // ========================================================================
    // Write-set and looked-up entries
    // ========================================================================

    /// Append a write
    pub fn add_modification(&self, modification: Modification) {
        self.data.lock().modifications.add(modification);
    }

    /// Replace the write-set
    pub fn set_modifications(&self, modifications: ModificationCollection) {
        self.data.lock().modifications = modifications;
    }

    /// Copy of the write-set
    pub fn modifications(&self) -> ModificationCollection {
        self.data.lock().modifications.clone()
    }

    /// Check if anything was written
    pub fn has_modifications(&self) -> bool {
        !self.data.lock().modifications.is_empty()
    }

    /// Store a looked-up entry, replacing one with the same key
    pub fn put_looked_up(&self, entry: CacheEntry) {
        self.data.lock().looked_up.put(entry);
    }

    /// Looked-up entry for a key
    pub fn looked_up(&self, key: &Key) -> Option<CacheEntry> {
        self.data.lock().looked_up.get(key).cloned()
    }

    /// Copy of every looked-up entry
    pub fn looked_up_entries(&self) -> CacheEntryCollection {
        self.data.lock().looked_up.clone()
    }

    /// Forget every looked-up entry
    pub fn clear_looked_up(&self) {
        self.data.lock().looked_up.clear();
    }

    // ========================================================================
    // Locks
    // ========================================================================

    /// Record a key locked on behalf of this transaction
    pub fn register_locked_key(&self, key: Key) {
        self.data.lock().locked_keys.add(key);
    }

    /// Copy of the locked keys
    pub fn locked_keys(&self) -> KeyCollection {
        self.data.lock().locked_keys.clone()
    }

    /// Remove and return the locked keys
    pub fn take_locked_keys(&self) -> KeyCollection {
        self.data.lock().locked_keys.take()
    }

    /// Check if this transaction holds the lock on `key`
    pub fn owns_lock(&self, key: &Key) -> bool {
        self.data.lock().locked_keys.contains(key)
    }

    /// Record a backup lock
    pub fn register_backup_lock(&self, key: Key) {
        self.data.lock().backup_locks.add(key);
    }

    /// Copy of the backup locks
    pub fn backup_locks(&self) -> KeyCollection {
        self.data.lock().backup_locks.clone()
    }

    /// Remove and return the backup locks
    pub fn take_backup_locks(&self) -> KeyCollection {
        self.data.lock().backup_locks.take()
    }

    /// Record keys as affected
    pub fn add_affected_keys<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) {
        self.data.lock().affected_keys.add_all(keys);
    }

    /// Copy of the affected keys
    pub fn affected_keys(&self) -> KeyCollection {
        self.data.lock().affected_keys.clone()
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// Record the version a read observed; the first read wins
    pub fn record_version_seen(&self, key: Key, version: VectorClock) {
        self.data.lock().versions_seen.insert_if_absent(key, version);
    }

    /// Replace the observed versions
    pub fn set_versions_seen(&self, versions: EntryVersionsMap) {
        self.data.lock().versions_seen = versions;
    }

    /// Copy of the observed versions
    pub fn versions_seen(&self) -> EntryVersionsMap {
        self.data.lock().versions_seen.clone()
    }

    /// Merge versions computed during prepare
    pub fn merge_updated_versions(&self, versions: &EntryVersionsMap) {
        self.data.lock().updated_versions.merge(versions);
    }

    /// Replace the computed versions
    pub fn set_updated_versions(&self, versions: EntryVersionsMap) {
        self.data.lock().updated_versions = versions;
    }

    /// Copy of the computed versions
    pub fn updated_versions(&self) -> EntryVersionsMap {
        self.data.lock().updated_versions.clone()
    }

    // ========================================================================
    // Participants
    // ========================================================================

    /// Record members that took part in prepare
    pub fn add_participants<'a>(&self, members: impl IntoIterator<Item = &'a Address>) {
        self.data.lock().participants.add_all(members);
    }

    /// Members that took part in prepare
    pub fn participants(&self) -> AddressCollection {
        self.data.lock().participants.clone()
    }

    // ========================================================================
    // Wait / notify
    // ========================================================================

    /// Wait until this transaction no longer holds `key`
    ///
    /// Returns `true` at once if the transaction already completed or never
    /// held `key` (locked or as backup). Otherwise waits up to `timeout` for
    /// completion and returns whether it happened.
    pub fn wait_for_lock_release(&self, key: &Key, timeout: Duration) -> bool {
        if self.completion.is_complete() {
            return true;
        }
        let holds = {
            let data = self.data.lock();
            data.locked_keys.contains(key) || data.backup_locks.contains(key)
        };
        if !holds {
            return true;
        }
        self.completion.wait(timeout)
    }

    /// Mark the transaction complete and wake lock waiters
    ///
    /// Call only after the transaction's locks were released.
    pub fn notify_on_transaction_finished(&self) {
        self.completion.notify();
    }

    /// Record that prepare and commit run as one step
    pub fn set_one_phase_commit(&self) {
        self.one_phase_commit.store(true, Ordering::SeqCst);
    }

    /// Check if commit was folded into prepare
    pub fn is_one_phase_commit(&self) -> bool {
        self.one_phase_commit.load(Ordering::SeqCst)
    }

    /// Check if the transaction completed
    pub fn is_complete(&self) -> bool {
        self.completion.is_complete()
    }

    /// Detached copy of the transaction state
    pub fn snapshot(&self) -> TxSnapshot {
        let data = self.data.lock().clone();
        TxSnapshot {
            gtx: self.gtx.clone(),
            status: data.status,
            modifications: data.modifications,
            locked_keys: data.locked_keys,
            backup_locks: data.backup_locks,
            affected_keys: data.affected_keys,
            updated_versions: data.updated_versions,
            versions_seen: data.versions_seen,
        }
    }
}
