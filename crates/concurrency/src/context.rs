//! Invocation contexts
//!
//! An [`InvocationContext`] is the scratch space one operation carries
//! through the interceptor pipeline: where it came from, which entries it
//! looked up and which keys it locked.
//!
//! | Scope | Looked-up entries | Locked keys | Lock owner |
//! |-------|-------------------|-------------|------------|
//! | non-transactional | own set | own set | the invocation |
//! | single-key | one entry | one key | the invocation |
//! | transactional | the transaction's | the transaction's | the transaction |
//!
//! A transactional context is a thin view over its [`CacheTransaction`]:
//! whatever the pipeline records lands in the transaction and outlives the
//! context.

use crate::lock::LockOwner;
use crate::transaction::CacheTransaction;
use gridkv_core::{
    Address, CacheEntry, CacheEntryCollection, EntryVersionsMap, Error, Key, KeyCollection,
    Result, VectorClock,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
enum Scope {
    NonTx {
        entries: CacheEntryCollection,
        locked: KeyCollection,
    },
    SingleKey {
        key: Option<Key>,
        entry: Option<CacheEntry>,
        locked: bool,
    },
    Tx(Arc<CacheTransaction>),
}

/// Per-operation state carried through the pipeline
#[derive(Debug)]
pub struct InvocationContext {
    origin: Option<Address>,
    lock_owner: LockOwner,
    scope: Scope,
    updated_versions: EntryVersionsMap,
}

impl InvocationContext {
    /// Check if the operation started on this member
    pub fn is_origin_local(&self) -> bool {
        self.origin.is_none()
    }

    /// Member the operation came from, `None` when local
    pub fn origin(&self) -> Option<&Address> {
        self.origin.as_ref()
    }

    /// Check if the operation runs inside a transaction
    pub fn is_in_tx_scope(&self) -> bool {
        matches!(self.scope, Scope::Tx(_))
    }

    /// Transaction of a transactional context
    pub fn transaction(&self) -> Option<&Arc<CacheTransaction>> {
        match &self.scope {
            Scope::Tx(tx) => Some(tx),
            _ => None,
        }
    }

    /// Owner used when this operation takes locks
    pub fn lock_owner(&self) -> &LockOwner {
        &self.lock_owner
    }

    fn check_single_key(key_slot: &mut Option<Key>, key: &Key) -> Result<()> {
        match key_slot {
            Some(existing) if existing != key => Err(Error::IllegalTransactionState(format!(
                "single-key context already bound to {}, cannot use {}",
                existing, key
            ))),
            Some(_) => Ok(()),
            None => {
                *key_slot = Some(key.clone());
                Ok(())
            }
        }
    }

    // ========================================================================
    // Looked-up entries
    // ========================================================================

    /// Looked-up entry for `key`
    pub fn lookup_entry(&self, key: &Key) -> Option<CacheEntry> {
        match &self.scope {
            Scope::NonTx { entries, .. } => entries.get(key).cloned(),
            Scope::SingleKey { entry, .. } => entry.as_ref().filter(|e| e.key() == key).cloned(),
            Scope::Tx(tx) => tx.looked_up(key),
        }
    }

    /// Store a looked-up entry, replacing one with the same key
    ///
    /// A single-key context rejects a second distinct key.
    pub fn put_looked_up(&mut self, entry: CacheEntry) -> Result<()> {
        match &mut self.scope {
            Scope::NonTx { entries, .. } => {
                entries.put(entry);
                Ok(())
            }
            Scope::SingleKey { key, entry: slot, .. } => {
                Self::check_single_key(key, entry.key())?;
                *slot = Some(entry);
                Ok(())
            }
            Scope::Tx(tx) => {
                tx.put_looked_up(entry);
                Ok(())
            }
        }
    }

    /// Copy of every looked-up entry
    pub fn looked_up_entries(&self) -> Vec<CacheEntry> {
        match &self.scope {
            Scope::NonTx { entries, .. } => entries.iter().cloned().collect(),
            Scope::SingleKey { entry, .. } => entry.iter().cloned().collect(),
            Scope::Tx(tx) => tx.looked_up_entries().iter().cloned().collect(),
        }
    }

    // ========================================================================
    // Locked keys
    // ========================================================================

    /// Record a key locked by this operation
    pub fn add_locked_key(&mut self, key: Key) -> Result<()> {
        match &mut self.scope {
            Scope::NonTx { locked, .. } => {
                locked.add(key);
                Ok(())
            }
            Scope::SingleKey {
                key: slot, locked, ..
            } => {
                Self::check_single_key(slot, &key)?;
                *locked = true;
                Ok(())
            }
            Scope::Tx(tx) => {
                tx.register_locked_key(key);
                Ok(())
            }
        }
    }

    /// Copy of the locked keys
    pub fn locked_keys(&self) -> KeyCollection {
        match &self.scope {
            Scope::NonTx { locked, .. } => locked.clone(),
            Scope::SingleKey { key, locked, .. } => match (key, locked) {
                (Some(k), true) => KeyCollection::from_iter([k.clone()]),
                _ => KeyCollection::new(),
            },
            Scope::Tx(tx) => tx.locked_keys(),
        }
    }

    /// Remove and return the locked keys
    pub fn take_locked_keys(&mut self) -> KeyCollection {
        match &mut self.scope {
            Scope::NonTx { locked, .. } => locked.take(),
            Scope::SingleKey { key, locked, .. } => {
                let was_locked = std::mem::replace(locked, false);
                match key {
                    Some(k) if was_locked => KeyCollection::from_iter([k.clone()]),
                    _ => KeyCollection::new(),
                }
            }
            Scope::Tx(tx) => tx.take_locked_keys(),
        }
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// Record the version a read observed, inside a transaction
    pub fn record_version_seen(&self, key: Key, version: VectorClock) {
        if let Scope::Tx(tx) = &self.scope {
            tx.record_version_seen(key, version);
        }
    }

    /// Version the write of `key` must be stamped with
    pub fn updated_version(&self, key: &Key) -> Option<VectorClock> {
        match &self.scope {
            Scope::Tx(tx) => tx.updated_versions().get(key).cloned(),
            _ => self.updated_versions.get(key).cloned(),
        }
    }

    /// Versions computed for this operation
    pub fn updated_versions(&self) -> EntryVersionsMap {
        match &self.scope {
            Scope::Tx(tx) => tx.updated_versions(),
            _ => self.updated_versions.clone(),
        }
    }

    /// Merge computed versions
    pub fn merge_updated_versions(&mut self, versions: &EntryVersionsMap) {
        match &self.scope {
            Scope::Tx(tx) => tx.merge_updated_versions(versions),
            _ => self.updated_versions.merge(versions),
        }
    }
}

/// Creates contexts with unique invocation ids
#[derive(Debug, Default)]
pub struct ContextFactory {
    next_invocation: AtomicU64,
}

impl ContextFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self::default()
    }

    fn next_owner(&self) -> LockOwner {
        LockOwner::Invocation(self.next_invocation.fetch_add(1, Ordering::Relaxed))
    }

    /// Non-transactional context over any number of keys
    pub fn create_non_tx(&self, origin: Option<Address>) -> InvocationContext {
        InvocationContext {
            origin,
            lock_owner: self.next_owner(),
            scope: Scope::NonTx {
                entries: CacheEntryCollection::new(),
                locked: KeyCollection::new(),
            },
            updated_versions: EntryVersionsMap::new(),
        }
    }

    /// Non-transactional context bound to one key
    pub fn create_single_key(&self, origin: Option<Address>) -> InvocationContext {
        InvocationContext {
            origin,
            lock_owner: self.next_owner(),
            scope: Scope::SingleKey {
                key: None,
                entry: None,
                locked: false,
            },
            updated_versions: EntryVersionsMap::new(),
        }
    }

    /// Transactional context, local when `origin` is `None`
    pub fn create_tx(&self, tx: Arc<CacheTransaction>, origin: Option<Address>) -> InvocationContext {
        InvocationContext {
            origin,
            lock_owner: LockOwner::Transaction(tx.gtx().clone()),
            scope: Scope::Tx(tx),
            updated_versions: EntryVersionsMap::new(),
        }
    }
}
