//! Write-through to the persistence collaborator
//!
//! Non-transactional writes reach the store right after the data container.
//! A transaction's write-set reaches it once, at commit, before the
//! container is touched: a store failure fails the commit and leaves memory
//! as it was.
//!
//! ## Proper writer
//!
//! A shared store is written by the member the operation started on. A
//! store private to each member is written by every owner of the key.
//!
//! ## Commit
//!
//! 1. Refuse an ambient transaction on a remotely-originated commit
//! 2. Suspend the caller's ambient transaction
//! 3. Replay the final state of every written key, in bulk when possible
//! 4. Resume the ambient transaction, forward the commit to the store
//! 5. Forget the transaction as preparing, whatever happened above

use super::{is_replica_copy, tx_of};
use crate::ambient::{AmbientTransactionManager, SuspendGuard};
use crate::command::{Command, Response};
use crate::interceptor::{Interceptor, Next};
use dashmap::DashSet;
use gridkv_concurrency::{CacheTransaction, InvocationContext};
use gridkv_core::{
    EntryVersionsMap, Error, Flag, FlagSet, GlobalTransaction, InternalCacheEntry, Key,
    KeyCollection, Modification, ModificationCollection, Result,
};
use gridkv_distribution::Ownership;
use gridkv_persistence::{CacheLoader, LoaderManager};
use gridkv_storage::DataContainer;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Counters of a [`CacheStoreInterceptor`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries written to the store
    pub cache_loader_stores: u64,
}

/// Final state of the keys a commit wrote
#[derive(Debug, Default)]
struct WriteSet {
    cleared: bool,
    stores: Vec<InternalCacheEntry>,
    removes: Vec<Key>,
}

/// Removes a transaction from the preparing set when dropped
struct PreparingGuard<'a> {
    preparing: &'a DashSet<GlobalTransaction>,
    gtx: &'a GlobalTransaction,
}

impl Drop for PreparingGuard<'_> {
    fn drop(&mut self) {
        self.preparing.remove(self.gtx);
    }
}

/// Persistence stage
pub struct CacheStoreInterceptor {
    persistence: Arc<LoaderManager>,
    container: Arc<DataContainer>,
    ownership: Arc<Ownership>,
    ambient: Option<Arc<dyn AmbientTransactionManager>>,
    preparing: DashSet<GlobalTransaction>,
    cache_loader_stores: AtomicU64,
    enabled: AtomicBool,
}

impl CacheStoreInterceptor {
    /// Create over the member's loaders
    pub fn new(
        persistence: Arc<LoaderManager>,
        container: Arc<DataContainer>,
        ownership: Arc<Ownership>,
        ambient: Option<Arc<dyn AmbientTransactionManager>>,
    ) -> Self {
        Self {
            persistence,
            container,
            ownership,
            ambient,
            preparing: DashSet::new(),
            cache_loader_stores: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    /// Counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            cache_loader_stores: self.cache_loader_stores.load(Ordering::Relaxed),
        }
    }

    /// Zero the counters
    pub fn reset_statistics(&self) {
        self.cache_loader_stores.store(0, Ordering::Relaxed);
    }

    /// Stop writing through; commands pass untouched from now on
    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            debug!("cache store stage disabled");
        }
    }

    /// Check if the stage writes through
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && self.persistence.is_enabled()
    }

    /// Transactions prepared here and not yet committed or rolled back
    pub fn preparing_transactions(&self) -> Vec<GlobalTransaction> {
        let mut txs: Vec<_> = self.preparing.iter().map(|g| g.key().clone()).collect();
        txs.sort();
        txs
    }

    fn skips(&self, flags: FlagSet) -> bool {
        flags.contains(Flag::SkipCacheStore)
            || (self.persistence.is_shared() && flags.contains(Flag::SkipSharedCacheStore))
    }

    /// Check if this member writes `key` to the store
    ///
    /// A shared store is written only by the member that `decides` the
    /// operation: the originator of a transaction, or the primary owner
    /// applying a non-transactional write.
    fn is_proper_writer(&self, decides: bool, key: &Key) -> bool {
        if self.persistence.is_shared() {
            decides
        } else {
            self.ownership.is_owner(key)
        }
    }

    fn is_proper_clearer(&self, decides: bool) -> bool {
        !self.persistence.is_shared() || decides
    }

    fn write(&self, loader: &dyn CacheLoader, set: WriteSet) -> Result<()> {
        if set.cleared {
            loader.clear()?;
        }
        let stored = set.stores.len() as u64;
        match loader.as_bulk() {
            Some(bulk) => {
                if !set.stores.is_empty() {
                    bulk.store_all(set.stores)?;
                }
                if !set.removes.is_empty() {
                    bulk.remove_all(&set.removes)?;
                }
            }
            None => {
                for entry in set.stores {
                    loader.store(entry)?;
                }
                for key in &set.removes {
                    loader.remove(key)?;
                }
            }
        }
        self.cache_loader_stores.fetch_add(stored, Ordering::Relaxed);
        Ok(())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Final state of the keys `tx` wrote, as this member must store it
    ///
    /// The originator reads its looked-up entries, which already hold the
    /// outcome of every write. Other members replay the write-set over their
    /// container.
    fn write_set(&self, ctx: &InvocationContext, tx: &CacheTransaction) -> WriteSet {
        let modifications = tx.modifications();
        let versions = tx.updated_versions();
        let mut set = WriteSet {
            cleared: modifications.contains_clear() && self.is_proper_clearer(ctx.is_origin_local()),
            ..WriteSet::default()
        };

        let mut finals: BTreeMap<Key, Option<InternalCacheEntry>> = BTreeMap::new();
        if ctx.is_origin_local() {
            for key in modifications.affected_keys() {
                if let Some(entry) = ctx.lookup_entry(&key) {
                    let stored = entry.value().map(|v| {
                        InternalCacheEntry::new(key.clone(), v.clone(), entry.metadata().clone())
                    });
                    finals.insert(key, stored);
                }
            }
        } else {
            let mut cleared = false;
            for modification in modifications.iter() {
                cleared |= modification.is_clear();
                self.replay(modification, &mut finals, cleared);
            }
        }

        let decides = ctx.is_origin_local();
        for (key, stored) in finals {
            if !self.skips(Self::flags_for(&modifications, &key)) && self.is_proper_writer(decides, &key) {
                match stored {
                    Some(entry) => set.stores.push(stamp(entry, &versions)),
                    None if !set.cleared => set.removes.push(key),
                    None => {}
                }
            }
        }
        set
    }

    /// Union of the flags of every write touching `key`
    fn flags_for(modifications: &ModificationCollection, key: &Key) -> FlagSet {
        modifications
            .iter()
            .filter(|m| m.affected_keys().contains(key))
            .fold(FlagSet::empty(), |acc, m| acc.union(m.flags()))
    }

    /// Fold one write into `finals`; after a clear, unknown keys start absent
    fn replay(
        &self,
        modification: &Modification,
        finals: &mut BTreeMap<Key, Option<InternalCacheEntry>>,
        cleared: bool,
    ) {
        match modification {
            Modification::Put {
                key,
                value,
                metadata,
                ..
            }
            | Modification::Replace {
                key,
                value,
                metadata,
                ..
            } => {
                finals.insert(
                    key.clone(),
                    Some(InternalCacheEntry::new(key.clone(), value.clone(), metadata.clone())),
                );
            }
            Modification::PutMap {
                entries, metadata, ..
            } => {
                for (key, value) in entries {
                    finals.insert(
                        key.clone(),
                        Some(InternalCacheEntry::new(key.clone(), value.clone(), metadata.clone())),
                    );
                }
            }
            Modification::Remove { key, .. } => {
                finals.insert(key.clone(), None);
            }
            Modification::ApplyDelta { key, delta, .. } => {
                let current = match finals.get(key) {
                    Some(known) => known.clone(),
                    None if cleared => None,
                    None => self.container.get(key),
                };
                let metadata = current.as_ref().map(|e| e.metadata.clone()).unwrap_or_default();
                let updated = delta.apply(current.as_ref().map(|e| &e.value));
                finals.insert(key.clone(), Some(InternalCacheEntry::new(key.clone(), updated, metadata)));
            }
            Modification::Clear { .. } => {
                for stored in finals.values_mut() {
                    *stored = None;
                }
            }
        }
    }

    fn commit(&self, ctx: &mut InvocationContext, command: &Command, next: Next<'_>) -> Result<Response> {
        let tx = tx_of(ctx)?;
        let _preparing = PreparingGuard {
            preparing: &self.preparing,
            gtx: tx.gtx(),
        };
        if !self.is_enabled() || !tx.has_modifications() {
            return next.invoke(ctx, command);
        }
        let Some(loader) = self.persistence.loader() else {
            return next.invoke(ctx, command);
        };
        if !ctx.is_origin_local() && self.ambient.as_ref().map_or(false, |m| m.has_active()) {
            return Err(Error::IllegalTransactionState(format!(
                "ambient transaction active while committing remote {}",
                tx.gtx()
            )));
        }

        let set = self.write_set(ctx, &tx);
        debug!(
            gtx = %tx.gtx(),
            stores = set.stores.len(),
            removes = set.removes.len(),
            cleared = set.cleared,
            "writing committed transaction to store"
        );
        {
            let _suspended = SuspendGuard::suspend(self.ambient.as_deref());
            self.write(loader.as_ref(), set)?;
        }
        loader.commit(tx.gtx())?;
        next.invoke(ctx, command)
    }

    fn rollback(&self, ctx: &mut InvocationContext, command: &Command, next: Next<'_>) -> Result<Response> {
        let tx = tx_of(ctx)?;
        let _preparing = PreparingGuard {
            preparing: &self.preparing,
            gtx: tx.gtx(),
        };
        let response = next.invoke(ctx, command);
        if self.is_enabled() && tx.has_modifications() {
            if let Some(loader) = self.persistence.loader() {
                if let Err(e) = loader.rollback(tx.gtx()) {
                    warn!(gtx = %tx.gtx(), error = %e, "store rollback failed");
                }
            }
        }
        response
    }

    // ========================================================================
    // Non-transactional writes
    // ========================================================================

    fn non_tx_write(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        modification: &Modification,
        next: Next<'_>,
    ) -> Result<Response> {
        let response = next.invoke(ctx, command)?;
        if !self.is_enabled() || !response.is_successful() || self.skips(modification.flags()) {
            return Ok(response);
        }
        let Some(loader) = self.persistence.loader() else {
            return Ok(response);
        };

        let decides = !is_replica_copy(ctx, modification.flags());
        let mut set = WriteSet::default();
        if modification.is_clear() {
            set.cleared = self.is_proper_clearer(decides);
        }
        for key in modification.affected_keys() {
            if !self.is_proper_writer(decides, &key) {
                continue;
            }
            let stored = ctx.lookup_entry(&key).and_then(|entry| {
                entry.value().map(|v| {
                    InternalCacheEntry::new(key.clone(), v.clone(), entry.metadata().clone())
                })
            });
            match stored {
                Some(entry) => set.stores.push(stamp(entry, &ctx.updated_versions())),
                None => set.removes.push(key),
            }
        }
        trace!(stores = set.stores.len(), removes = set.removes.len(), "write-through");
        self.write(loader.as_ref(), set)?;
        Ok(response)
    }

    fn invalidate(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        keys: &KeyCollection,
        next: Next<'_>,
    ) -> Result<Response> {
        let response = next.invoke(ctx, command)?;
        if !self.is_enabled() || self.skips(command.flags()) {
            return Ok(response);
        }
        if let Some(loader) = self.persistence.loader() {
            let decides = !is_replica_copy(ctx, command.flags());
            let removes: Vec<Key> = keys
                .iter()
                .filter(|k| self.is_proper_writer(decides, k))
                .cloned()
                .collect();
            self.write(
                loader.as_ref(),
                WriteSet {
                    removes,
                    ..WriteSet::default()
                },
            )?;
        }
        Ok(response)
    }
}

fn stamp(entry: InternalCacheEntry, versions: &EntryVersionsMap) -> InternalCacheEntry {
    match versions.get(&entry.key) {
        Some(version) => InternalCacheEntry {
            metadata: entry.metadata.clone().with_version(version.clone()),
            ..entry
        },
        None => entry,
    }
}

impl Interceptor for CacheStoreInterceptor {
    fn name(&self) -> &'static str {
        "cache-store"
    }

    fn handle(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        next: Next<'_>,
    ) -> Result<Response> {
        match command {
            Command::Prepare(p) | Command::VersionedPrepare { prepare: p, .. } => {
                if self.is_enabled() {
                    self.preparing.insert(p.gtx.clone());
                }
                next.invoke(ctx, command)
            }
            Command::Commit { .. } | Command::VersionedCommit { .. } => self.commit(ctx, command, next),
            Command::Rollback { .. } => self.rollback(ctx, command, next),
            Command::Write { modification, .. } if !ctx.is_in_tx_scope() => {
                self.non_tx_write(ctx, command, modification, next)
            }
            Command::Invalidate { keys, .. } => self.invalidate(ctx, command, keys, next),
            _ => next.invoke(ctx, command),
        }
    }
}

impl fmt::Debug for CacheStoreInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStoreInterceptor")
            .field("enabled", &self.is_enabled())
            .field("preparing", &self.preparing.len())
            .field("stats", &self.stats())
            .finish()
    }
}
