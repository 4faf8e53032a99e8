//! Sharded data container
//!
//! # Design
//!
//! - DashMap: 16-way sharded by default, lock-free reads
//! - FxHash: fast non-crypto hash for the shard and bucket choice
//! - Expired entries are dropped lazily when read, or in bulk by
//!   [`DataContainer::purge_expired`]
//!
//! # Thread Safety
//!
//! All operations are thread-safe:
//! - get(): only the key's shard is read-locked
//! - put(): only the key's shard is write-locked
//!
//! The container does not lock keys. Isolation between writers is the job of
//! the lock manager above it.

use chrono::Utc;
use dashmap::DashMap;
use gridkv_core::{InternalCacheEntry, Key, Metadata, Value, VectorClock};
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use tracing::trace;

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// In-memory entries of one member
///
/// # Example
///
/// ```
/// use gridkv_core::{Key, Metadata, Value};
/// use gridkv_storage::DataContainer;
///
/// let container = DataContainer::new();
/// container.put(Key::from("k"), Value::Int(1), Metadata::new());
/// assert_eq!(container.get(&Key::from("k")).map(|e| e.value), Some(Value::Int(1)));
/// ```
#[derive(Debug)]
pub struct DataContainer {
    entries: DashMap<Key, InternalCacheEntry, FxBuildHasher>,
}

impl DataContainer {
    /// Create an empty container
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Create with expected number of entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher(capacity, FxBuildHasher::default()),
        }
    }

    // ========================================================================
    // Get/Put/Remove Operations
    // ========================================================================

    /// Get a live entry
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&self, key: &Key) -> Option<InternalCacheEntry> {
        let entry = self.entries.get(key).map(|e| e.value().clone())?;
        if entry.is_expired() {
            trace!(key = %key, "dropping expired entry on read");
            self.entries.remove_if(key, |_, e| e.is_expired());
            return None;
        }
        Some(entry)
    }

    /// Get an entry without the expiry check
    pub fn peek(&self, key: &Key) -> Option<InternalCacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Version of the live entry for a key
    pub fn version(&self, key: &Key) -> Option<VectorClock> {
        self.get(key).and_then(|e| e.metadata.version)
    }

    /// Store a value, returning the previous entry
    pub fn put(&self, key: Key, value: Value, metadata: Metadata) -> Option<InternalCacheEntry> {
        let entry = InternalCacheEntry::new(key.clone(), value, metadata);
        self.entries.insert(key, entry)
    }

    /// Store a fully-formed entry, returning the previous one
    pub fn put_entry(&self, entry: InternalCacheEntry) -> Option<InternalCacheEntry> {
        self.entries.insert(entry.key.clone(), entry)
    }

    /// Remove a key, returning the removed entry
    pub fn remove(&self, key: &Key) -> Option<InternalCacheEntry> {
        self.entries.remove(key).map(|(_, e)| e)
    }

    /// Check if a live entry exists
    pub fn contains_key(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    // ========================================================================
    // Whole-container Operations
    // ========================================================================

    /// Snapshot of every key
    pub fn keys(&self) -> Vec<Key> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every live entry
    pub fn entries(&self) -> Vec<InternalCacheEntry> {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired_at(now))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired_at(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            trace!(purged, "purged expired entries");
        }
        purged
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DataContainer {
    fn default() -> Self {
        Self::new()
    }
}
