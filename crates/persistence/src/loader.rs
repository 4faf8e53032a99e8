//! Persistence collaborator interfaces
//!
//! The transactional core talks to external stores only through these
//! traits. A plain [`CacheLoader`] stores and loads single entries; a store
//! that can batch also implements [`BulkCacheLoader`] and exposes it through
//! [`CacheLoader::as_bulk`].

use gridkv_core::{GlobalTransaction, InternalCacheEntry, Key, Result};

/// Decides which keys a bulk load returns
pub trait KeyFilter: Send + Sync {
    /// Check if `key` should be loaded
    fn should_load(&self, key: &Key) -> bool;

    /// Check if loading should continue after `loaded` entries
    fn load_more(&self, _loaded: usize) -> bool {
        true
    }
}

/// Filter accepting every key
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl KeyFilter for AcceptAll {
    fn should_load(&self, _key: &Key) -> bool {
        true
    }
}

/// Filter accepting at most `limit` keys
#[derive(Debug, Clone, Copy)]
pub struct Limit(pub usize);

impl KeyFilter for Limit {
    fn should_load(&self, _key: &Key) -> bool {
        true
    }

    fn load_more(&self, loaded: usize) -> bool {
        loaded < self.0
    }
}

/// Single-entry persistence collaborator
pub trait CacheLoader: Send + Sync {
    /// Name, unique among the configured loaders
    fn name(&self) -> &str;

    /// Start the loader
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Stop the loader
    fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Load the entry for `key`
    fn load(&self, key: &Key) -> Result<Option<InternalCacheEntry>>;

    /// Check if the store holds `key`
    fn contains(&self, key: &Key) -> Result<bool> {
        Ok(self.load(key)?.is_some())
    }

    /// Store an entry
    fn store(&self, entry: InternalCacheEntry) -> Result<()>;

    /// Remove an entry, returning whether it existed
    fn remove(&self, key: &Key) -> Result<bool>;

    /// Remove every entry
    fn clear(&self) -> Result<()>;

    /// End of a transaction's writes
    fn commit(&self, _gtx: &GlobalTransaction) -> Result<()> {
        Ok(())
    }

    /// Abandon a transaction's writes
    fn rollback(&self, _gtx: &GlobalTransaction) -> Result<()> {
        Ok(())
    }

    /// Drop expired entries, returning how many
    fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Bulk interface, if supported
    fn as_bulk(&self) -> Option<&dyn BulkCacheLoader> {
        None
    }
}

/// Persistence collaborator that can batch
pub trait BulkCacheLoader: CacheLoader {
    /// Store several entries
    fn store_all(&self, entries: Vec<InternalCacheEntry>) -> Result<()>;

    /// Remove several entries
    fn remove_all(&self, keys: &[Key]) -> Result<()>;

    /// Load the entries accepted by `filter`
    fn bulk_load(&self, filter: &dyn KeyFilter) -> Result<Vec<InternalCacheEntry>>;

    /// Load the entries for `keys` that exist
    fn load_keys(&self, keys: &[Key]) -> Result<Vec<InternalCacheEntry>> {
        let mut loaded = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.load(key)? {
                loaded.push(entry);
            }
        }
        Ok(loaded)
    }

    /// Number of stored entries
    fn size(&self) -> Result<usize>;
}
