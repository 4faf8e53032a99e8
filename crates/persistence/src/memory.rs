//! In-memory store
//!
//! A [`CacheLoader`] keeping entries in a DashMap. It is the store used by
//! tests and by embedders that want write-through bookkeeping without a
//! backend. The bulk interface can be switched off to exercise the
//! single-entry path, and the store can be made unavailable to exercise
//! failure handling.

use crate::loader::{BulkCacheLoader, CacheLoader, KeyFilter};
use dashmap::DashMap;
use gridkv_core::{Error, GlobalTransaction, InternalCacheEntry, Key, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Call counters of an [`InMemoryStore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    /// Single-entry stores
    pub stores: u64,
    /// Single-entry removes
    pub removes: u64,
    /// Bulk stores
    pub bulk_stores: u64,
    /// Bulk removes
    pub bulk_removes: u64,
    /// Clears
    pub clears: u64,
}

/// DashMap-backed store
#[derive(Debug)]
pub struct InMemoryStore {
    name: String,
    entries: DashMap<Key, InternalCacheEntry>,
    bulk: bool,
    available: AtomicBool,
    started: AtomicBool,
    stores: AtomicU64,
    removes: AtomicU64,
    bulk_stores: AtomicU64,
    bulk_removes: AtomicU64,
    clears: AtomicU64,
    commits: Mutex<Vec<GlobalTransaction>>,
    rollbacks: Mutex<Vec<GlobalTransaction>>,
}

impl InMemoryStore {
    /// Create a store with bulk support
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_bulk(name, true)
    }

    /// Create a store, choosing whether the bulk interface is exposed
    pub fn with_bulk(name: impl Into<String>, bulk: bool) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            bulk,
            available: AtomicBool::new(true),
            started: AtomicBool::new(false),
            stores: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            bulk_stores: AtomicU64::new(0),
            bulk_removes: AtomicU64::new(0),
            clears: AtomicU64::new(0),
            commits: Mutex::new(Vec::new()),
            rollbacks: Mutex::new(Vec::new()),
        }
    }

    /// Make every subsequent call fail, or succeed again
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Persistence(format!("store {} is unavailable", self.name)))
        }
    }

    /// Check if `start` was called more recently than `stop`
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Stored entry, bypassing availability
    pub fn peek(&self, key: &Key) -> Option<InternalCacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Number of entries, bypassing availability
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Call counters
    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            stores: self.stores.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            bulk_stores: self.bulk_stores.load(Ordering::Relaxed),
            bulk_removes: self.bulk_removes.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
        }
    }

    /// Transactions committed against this store
    pub fn committed(&self) -> Vec<GlobalTransaction> {
        self.commits.lock().clone()
    }

    /// Transactions rolled back against this store
    pub fn rolled_back(&self) -> Vec<GlobalTransaction> {
        self.rollbacks.lock().clone()
    }
}

impl CacheLoader for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        self.check()
    }

    fn load(&self, key: &Key) -> Result<Option<InternalCacheEntry>> {
        self.check()?;
        Ok(self.peek(key).filter(|e| !e.is_expired()))
    }

    fn store(&self, entry: InternalCacheEntry) -> Result<()> {
        self.check()?;
        self.stores.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn remove(&self, key: &Key) -> Result<bool> {
        self.check()?;
        self.removes.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.remove(key).is_some())
    }

    fn clear(&self) -> Result<()> {
        self.check()?;
        self.clears.fetch_add(1, Ordering::Relaxed);
        self.entries.clear();
        Ok(())
    }

    fn commit(&self, gtx: &GlobalTransaction) -> Result<()> {
        self.check()?;
        self.commits.lock().push(gtx.clone());
        Ok(())
    }

    fn rollback(&self, gtx: &GlobalTransaction) -> Result<()> {
        self.check()?;
        self.rollbacks.lock().push(gtx.clone());
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize> {
        self.check()?;
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        Ok(before.saturating_sub(self.entries.len()))
    }

    fn as_bulk(&self) -> Option<&dyn BulkCacheLoader> {
        if self.bulk {
            Some(self)
        } else {
            None
        }
    }
}

impl BulkCacheLoader for InMemoryStore {
    fn store_all(&self, entries: Vec<InternalCacheEntry>) -> Result<()> {
        self.check()?;
        self.bulk_stores.fetch_add(1, Ordering::Relaxed);
        for entry in entries {
            self.entries.insert(entry.key.clone(), entry);
        }
        Ok(())
    }

    fn remove_all(&self, keys: &[Key]) -> Result<()> {
        self.check()?;
        self.bulk_removes.fetch_add(1, Ordering::Relaxed);
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    fn bulk_load(&self, filter: &dyn KeyFilter) -> Result<Vec<InternalCacheEntry>> {
        self.check()?;
        let mut loaded = Vec::new();
        for e in self.entries.iter() {
            if !filter.load_more(loaded.len()) {
                break;
            }
            if !e.value().is_expired() && filter.should_load(e.key()) {
                loaded.push(e.value().clone());
            }
        }
        Ok(loaded)
    }

    fn size(&self) -> Result<usize> {
        self.check()?;
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{AcceptAll, Limit};
    use gridkv_core::{Metadata, Value};

    fn entry(key: &str, v: i64) -> InternalCacheEntry {
        InternalCacheEntry::new(Key::from(key), Value::Int(v), Metadata::new())
    }

    #[test]
    fn test_store_load_remove() {
        let s = InMemoryStore::new("mem");
        s.store(entry("a", 1)).unwrap();
        assert_eq!(s.load(&Key::from("a")).unwrap().map(|e| e.value), Some(Value::Int(1)));
        assert!(s.contains(&Key::from("a")).unwrap());
        assert!(s.remove(&Key::from("a")).unwrap());
        assert!(!s.remove(&Key::from("a")).unwrap());
        assert_eq!(s.calls().removes, 2);
    }

    #[test]
    fn test_unavailable_store_surfaces_errors() {
        let s = InMemoryStore::new("mem");
        s.set_available(false);
        assert!(matches!(s.store(entry("a", 1)), Err(Error::Persistence(_))));
        assert!(s.load(&Key::from("a")).is_err());
        s.set_available(true);
        assert!(s.store(entry("a", 1)).is_ok());
    }

    #[test]
    fn test_bulk_toggle() {
        assert!(InMemoryStore::new("a").as_bulk().is_some());
        assert!(InMemoryStore::with_bulk("b", false).as_bulk().is_none());
    }

    #[test]
    fn test_bulk_load_with_filters() {
        let s = InMemoryStore::new("mem");
        s.store_all((0..10).map(|i| entry(&format!("k{}", i), i)).collect())
            .unwrap();
        assert_eq!(s.size().unwrap(), 10);
        assert_eq!(s.bulk_load(&AcceptAll).unwrap().len(), 10);
        assert_eq!(s.bulk_load(&Limit(3)).unwrap().len(), 3);
        let found = s
            .load_keys(&[Key::from("k1"), Key::from("missing")])
            .unwrap();
        assert_eq!(found.len(), 1);
        s.remove_all(&[Key::from("k1"), Key::from("k2")]).unwrap();
        assert_eq!(s.len(), 8);
    }

    #[test]
    fn test_commit_and_rollback_recorded() {
        let s = InMemoryStore::new("mem");
        let gtx = GlobalTransaction::new(gridkv_core::Address::new("n"), 1);
        s.commit(&gtx).unwrap();
        s.rollback(&gtx).unwrap();
        assert_eq!(s.committed(), vec![gtx.clone()]);
        assert_eq!(s.rolled_back(), vec![gtx]);
    }
}
