//! Loader manager
//!
//! Owns the configured loaders of a member and hands the pipeline a single
//! [`CacheLoader`]: the loader itself when only one is configured, the
//! [`ChainingLoader`] otherwise.
//!
//! ## Lifecycle
//!
//! 1. `start()`: start every loader, clear them if `purge_on_startup`
//! 2. `preload()`: copy stored entries into the container through the bulk
//!    interface, filtered by ownership
//! 3. `stop()`: stop every loader, logging failures

use crate::chaining::ChainingLoader;
use crate::loader::{CacheLoader, KeyFilter};
use gridkv_core::{InternalCacheEntry, Key, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Persistence settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Whether loaders are used at all
    pub enabled: bool,
    /// Whether every member writes to the same store
    pub shared: bool,
    /// Load stored entries into memory at startup
    pub preload: bool,
    /// Clear the stores at startup
    pub purge_on_startup: bool,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            shared: false,
            preload: false,
            purge_on_startup: false,
        }
    }
}

/// Configured loaders of one member
#[derive(Debug)]
pub struct LoaderManager {
    settings: PersistenceSettings,
    chain: Arc<ChainingLoader>,
    enabled: AtomicBool,
}

impl LoaderManager {
    /// Create with the given loaders
    pub fn new(settings: PersistenceSettings, loaders: Vec<Arc<dyn CacheLoader>>) -> Self {
        let chain = Arc::new(ChainingLoader::new());
        for loader in loaders {
            chain.add_loader(loader);
        }
        let enabled = settings.enabled && !chain.is_empty();
        Self {
            settings,
            chain,
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Manager without loaders
    pub fn disabled() -> Self {
        Self::new(
            PersistenceSettings {
                enabled: false,
                ..PersistenceSettings::default()
            },
            Vec::new(),
        )
    }

    /// Settings
    pub fn settings(&self) -> &PersistenceSettings {
        &self.settings
    }

    /// Check if a loader is in use
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Check if the store is shared between members
    pub fn is_shared(&self) -> bool {
        self.settings.shared
    }

    /// Loader the pipeline should use, `None` when disabled
    pub fn loader(&self) -> Option<Arc<dyn CacheLoader>> {
        if !self.is_enabled() {
            return None;
        }
        let mut loaders = self.chain.loaders();
        match loaders.len() {
            0 => None,
            1 => loaders.pop(),
            _ => Some(Arc::clone(&self.chain) as Arc<dyn CacheLoader>),
        }
    }

    /// Start every loader
    pub fn start(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.chain.start()?;
        if self.settings.purge_on_startup {
            info!("clearing stores on startup");
            self.chain.clear()?;
        }
        Ok(())
    }

    /// Stop every loader
    pub fn stop(&self) {
        if let Err(e) = self.chain.stop() {
            warn!(error = %e, "loaders failed to stop cleanly");
        }
    }

    /// Remove the loader named `name`
    ///
    /// Persistence is disabled once no loader remains.
    pub fn disable_loader(&self, name: &str) -> bool {
        let removed = self.chain.remove_loader(name).is_some();
        if self.chain.is_empty() {
            self.enabled.store(false, Ordering::SeqCst);
            info!("persistence disabled, no loader left");
        }
        removed
    }

    /// Feed stored entries accepted by `filter` to `sink`
    ///
    /// Entries come from each loader's bulk interface; loaders without one
    /// are skipped. When several loaders hold a key, the first one wins.
    /// Returns the number of entries fed.
    pub fn preload(
        &self,
        filter: &dyn KeyFilter,
        sink: &mut dyn FnMut(InternalCacheEntry),
    ) -> Result<usize> {
        if !self.is_enabled() || !self.settings.preload {
            return Ok(0);
        }
        let mut seen: HashSet<Key> = HashSet::new();
        for loader in self.chain.loaders() {
            let Some(bulk) = loader.as_bulk() else {
                warn!(loader = loader.name(), "loader has no bulk interface, skipping preload");
                continue;
            };
            for entry in bulk.bulk_load(filter)? {
                if seen.insert(entry.key.clone()) {
                    sink(entry);
                }
            }
        }
        debug!(entries = seen.len(), "preload finished");
        Ok(seen.len())
    }

    /// Drop expired entries from every loader
    pub fn purge_expired(&self) -> Result<usize> {
        if !self.is_enabled() {
            return Ok(0);
        }
        self.chain.purge_expired()
    }
}
