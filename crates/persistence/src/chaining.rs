//! Chain of loaders
//!
//! Reads go to the loaders in order and stop at the first hit. Writes go to
//! every loader. Loaders can be added and removed by name at runtime.

use crate::loader::CacheLoader;
use gridkv_core::{GlobalTransaction, InternalCacheEntry, Key, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Ordered set of loaders acting as one
#[derive(Default)]
pub struct ChainingLoader {
    loaders: RwLock<Vec<Arc<dyn CacheLoader>>>,
}

impl ChainingLoader {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a loader
    pub fn add_loader(&self, loader: Arc<dyn CacheLoader>) {
        self.loaders.write().push(loader);
    }

    /// Remove the loader named `name` and stop it
    ///
    /// A failure to stop is logged; the loader is removed regardless.
    pub fn remove_loader(&self, name: &str) -> Option<Arc<dyn CacheLoader>> {
        let removed = {
            let mut loaders = self.loaders.write();
            let i = loaders.iter().position(|l| l.name() == name)?;
            loaders.remove(i)
        };
        if let Err(e) = removed.stop() {
            warn!(loader = name, error = %e, "loader failed to stop on removal");
        }
        info!(loader = name, "loader removed from chain");
        Some(removed)
    }

    /// Snapshot of the loaders
    pub fn loaders(&self) -> Vec<Arc<dyn CacheLoader>> {
        self.loaders.read().clone()
    }

    /// Names of the loaders in order
    pub fn names(&self) -> Vec<String> {
        self.loaders.read().iter().map(|l| l.name().to_string()).collect()
    }

    /// Number of loaders
    pub fn len(&self) -> usize {
        self.loaders.read().len()
    }

    /// Check if the chain has no loaders
    pub fn is_empty(&self) -> bool {
        self.loaders.read().is_empty()
    }

    fn for_each(&self, mut f: impl FnMut(&dyn CacheLoader) -> Result<()>) -> Result<()> {
        for loader in self.loaders() {
            f(loader.as_ref())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChainingLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainingLoader")
            .field("loaders", &self.names())
            .finish()
    }
}

impl CacheLoader for ChainingLoader {
    fn name(&self) -> &str {
        "chain"
    }

    fn start(&self) -> Result<()> {
        self.for_each(|l| l.start())
    }

    fn stop(&self) -> Result<()> {
        let mut first_error = None;
        for loader in self.loaders() {
            if let Err(e) = loader.stop() {
                warn!(loader = loader.name(), error = %e, "loader failed to stop");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn load(&self, key: &Key) -> Result<Option<InternalCacheEntry>> {
        for loader in self.loaders() {
            if let Some(entry) = loader.load(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn store(&self, entry: InternalCacheEntry) -> Result<()> {
        self.for_each(|l| l.store(entry.clone()))
    }

    fn remove(&self, key: &Key) -> Result<bool> {
        let mut removed = false;
        self.for_each(|l| {
            removed |= l.remove(key)?;
            Ok(())
        })?;
        Ok(removed)
    }

    fn clear(&self) -> Result<()> {
        self.for_each(|l| l.clear())
    }

    fn commit(&self, gtx: &GlobalTransaction) -> Result<()> {
        self.for_each(|l| l.commit(gtx))
    }

    fn rollback(&self, gtx: &GlobalTransaction) -> Result<()> {
        self.for_each(|l| l.rollback(gtx))
    }

    fn purge_expired(&self) -> Result<usize> {
        let mut purged = 0;
        self.for_each(|l| {
            purged += l.purge_expired()?;
            Ok(())
        })?;
        Ok(purged)
    }
}
