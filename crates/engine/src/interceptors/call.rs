//! Command application
//!
//! Last stage of the pipeline. Inside a transaction, writes only change the
//! transaction's looked-up entries; the data container sees them when the
//! commit replays the write-set. Outside a transaction, writes go straight
//! to the container for the keys this member owns.
//!
//! Reads resolve in this order: the context, the container (owned keys),
//! then the persistence collaborator, whose hit is copied into the
//! container. A transaction that contains a clear reads every key it has
//! not written since as absent.

use super::{is_replica_copy, tx_of};
use crate::command::{Command, Response};
use crate::interceptor::{Interceptor, Next};
use gridkv_concurrency::InvocationContext;
use gridkv_core::{
    CacheEntry, EntryVersionsMap, InternalCacheEntry, Key, Metadata, Modification, Result,
    Value, VectorClock,
};
use gridkv_distribution::Ownership;
use gridkv_persistence::LoaderManager;
use gridkv_storage::DataContainer;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Applies commands to contexts and the data container
pub struct CallInterceptor {
    container: Arc<DataContainer>,
    ownership: Arc<Ownership>,
    persistence: Arc<LoaderManager>,
}

impl CallInterceptor {
    /// Create over the member's container
    pub fn new(
        container: Arc<DataContainer>,
        ownership: Arc<Ownership>,
        persistence: Arc<LoaderManager>,
    ) -> Self {
        Self {
            container,
            ownership,
            persistence,
        }
    }

    fn load(&self, key: &Key) -> Result<Option<InternalCacheEntry>> {
        let Some(loader) = self.persistence.loader() else {
            return Ok(None);
        };
        match loader.load(key)? {
            Some(entry) if !entry.is_expired() => {
                trace!(key = %key, "read-through from store");
                self.container.put_entry(entry.clone());
                Ok(Some(entry))
            }
            _ => Ok(None),
        }
    }

    /// Entry for `key` as this invocation currently sees it
    fn current_entry(&self, ctx: &InvocationContext, key: &Key) -> Result<CacheEntry> {
        if let Some(entry) = ctx.lookup_entry(key) {
            return Ok(entry);
        }
        if let Some(tx) = ctx.transaction() {
            if tx.modifications().contains_clear() {
                return Ok(CacheEntry::absent(key.clone()));
            }
        }
        if !self.ownership.is_owner(key) {
            return Ok(CacheEntry::absent(key.clone()));
        }
        let stored = match self.container.get(key) {
            Some(stored) => Some(stored),
            None => self.load(key)?,
        };
        Ok(CacheEntry::wrap(key.clone(), stored))
    }

    /// Record what a transactional read observed
    fn record_read(ctx: &InvocationContext, entry: &CacheEntry) {
        if !entry.is_changed() {
            let version = entry.version().cloned().unwrap_or_else(VectorClock::empty);
            ctx.record_version_seen(entry.key().clone(), version);
        }
    }

    fn to_internal(entry: &CacheEntry) -> Option<InternalCacheEntry> {
        entry
            .value()
            .map(|v| InternalCacheEntry::new(entry.key().clone(), v.clone(), entry.metadata().clone()))
    }

    fn get(&self, ctx: &mut InvocationContext, key: &Key) -> Result<Response> {
        let entry = self.current_entry(ctx, key)?;
        if ctx.is_in_tx_scope() {
            Self::record_read(ctx, &entry);
            ctx.put_looked_up(entry.clone())?;
        }
        Ok(Response::Entry(Self::to_internal(&entry)))
    }

    // ========================================================================
    // Transactional writes
    // ========================================================================

    fn tx_set(ctx: &mut InvocationContext, key: &Key, value: Value, metadata: Metadata) -> Result<()> {
        let mut entry = ctx
            .lookup_entry(key)
            .unwrap_or_else(|| CacheEntry::absent(key.clone()));
        entry.set_value(value, metadata);
        ctx.put_looked_up(entry)
    }

    fn tx_write(&self, ctx: &mut InvocationContext, modification: &Modification) -> Result<Response> {
        match modification {
            Modification::Put {
                key,
                value,
                metadata,
                ..
            } => {
                Self::tx_set(ctx, key, value.clone(), metadata.clone())?;
                Ok(Response::None)
            }
            Modification::PutMap {
                entries, metadata, ..
            } => {
                for (key, value) in entries {
                    Self::tx_set(ctx, key, value.clone(), metadata.clone())?;
                }
                Ok(Response::None)
            }
            Modification::Remove { key, .. } => {
                let mut entry = ctx
                    .lookup_entry(key)
                    .unwrap_or_else(|| CacheEntry::absent(key.clone()));
                entry.remove();
                ctx.put_looked_up(entry)?;
                Ok(Response::None)
            }
            Modification::Replace {
                key,
                expected,
                value,
                metadata,
                ..
            } => {
                let mut entry = self.current_entry(ctx, key)?;
                Self::record_read(ctx, &entry);
                let matches = entry.value() == Some(expected);
                if matches {
                    entry.set_value(value.clone(), metadata.clone());
                }
                ctx.put_looked_up(entry)?;
                Ok(Response::Bool(matches))
            }
            Modification::ApplyDelta { key, delta, .. } => {
                let mut entry = self.current_entry(ctx, key)?;
                Self::record_read(ctx, &entry);
                let updated = delta.apply(entry.value());
                let metadata = entry.metadata().clone();
                entry.set_value(updated, metadata);
                ctx.put_looked_up(entry)?;
                Ok(Response::None)
            }
            Modification::Clear { .. } => {
                for mut entry in ctx.looked_up_entries() {
                    entry.remove();
                    ctx.put_looked_up(entry)?;
                }
                Ok(Response::None)
            }
        }
    }

    // ========================================================================
    // Non-transactional writes
    // ========================================================================

    fn stamped(metadata: &Metadata, version: Option<VectorClock>) -> Metadata {
        match version {
            Some(v) => metadata.clone().with_version(v),
            None => metadata.clone(),
        }
    }

    fn apply_put(&self, ctx: &mut InvocationContext, key: &Key, value: &Value, metadata: &Metadata) -> Result<()> {
        let metadata = Self::stamped(metadata, ctx.updated_version(key));
        if self.ownership.is_owner(key) {
            self.container.put(key.clone(), value.clone(), metadata.clone());
        }
        let mut entry = CacheEntry::absent(key.clone());
        entry.set_value(value.clone(), metadata);
        ctx.put_looked_up(entry)
    }

    fn apply_remove(&self, ctx: &mut InvocationContext, key: &Key) -> Result<()> {
        if self.ownership.is_owner(key) {
            self.container.remove(key);
        }
        let mut entry = CacheEntry::absent(key.clone());
        entry.remove();
        ctx.put_looked_up(entry)
    }

    fn non_tx_write(&self, ctx: &mut InvocationContext, modification: &Modification) -> Result<Response> {
        match modification {
            Modification::Put {
                key,
                value,
                metadata,
                ..
            } => {
                self.apply_put(ctx, key, value, metadata)?;
                Ok(Response::None)
            }
            Modification::PutMap {
                entries, metadata, ..
            } => {
                for (key, value) in entries {
                    self.apply_put(ctx, key, value, metadata)?;
                }
                Ok(Response::None)
            }
            Modification::Remove { key, .. } => {
                self.apply_remove(ctx, key)?;
                Ok(Response::None)
            }
            Modification::Replace {
                key,
                expected,
                value,
                metadata,
                ..
            } => {
                if !is_replica_copy(ctx, modification.flags()) {
                    let current = self.current_entry(ctx, key)?;
                    if current.value() != Some(expected) {
                        trace!(key = %key, "replace condition not met");
                        return Ok(Response::Bool(false));
                    }
                }
                self.apply_put(ctx, key, value, metadata)?;
                Ok(Response::Bool(true))
            }
            Modification::ApplyDelta { key, delta, .. } => {
                let current = self.current_entry(ctx, key)?;
                let updated = delta.apply(current.value());
                let metadata = current.metadata().clone();
                self.apply_put(ctx, key, &updated, &metadata)?;
                Ok(Response::None)
            }
            Modification::Clear { .. } => {
                debug!(entries = self.container.len(), "clearing container");
                self.container.clear();
                Ok(Response::None)
            }
        }
    }

    // ========================================================================
    // Commit
    // ========================================================================

    fn commit_put(&self, key: &Key, value: Value, metadata: &Metadata, versions: &EntryVersionsMap) {
        if self.ownership.is_owner(key) {
            let metadata = Self::stamped(metadata, versions.get(key).cloned());
            self.container.put(key.clone(), value, metadata);
        }
    }

    fn replay(&self, modification: &Modification, versions: &EntryVersionsMap) {
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
            } => self.commit_put(key, value.clone(), metadata, versions),
            Modification::PutMap {
                entries, metadata, ..
            } => {
                for (key, value) in entries {
                    self.commit_put(key, value.clone(), metadata, versions);
                }
            }
            Modification::Remove { key, .. } => {
                if self.ownership.is_owner(key) {
                    self.container.remove(key);
                }
            }
            Modification::ApplyDelta { key, delta, .. } => {
                if self.ownership.is_owner(key) {
                    let current = self.container.get(key);
                    let metadata = current.as_ref().map(|e| e.metadata.clone()).unwrap_or_default();
                    let updated = delta.apply(current.as_ref().map(|e| &e.value));
                    self.commit_put(key, updated, &metadata, versions);
                }
            }
            Modification::Clear { .. } => self.container.clear(),
        }
    }

    fn commit(&self, ctx: &mut InvocationContext) -> Result<Response> {
        let tx = tx_of(ctx)?;
        let versions = tx.updated_versions();
        let modifications = tx.modifications();
        debug!(gtx = %tx.gtx(), writes = modifications.len(), "applying committed write-set");
        for modification in modifications.iter() {
            self.replay(modification, &versions);
        }
        Ok(Response::None)
    }
}

impl Interceptor for CallInterceptor {
    fn name(&self) -> &'static str {
        "call"
    }

    fn handle(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        _next: Next<'_>,
    ) -> Result<Response> {
        match command {
            Command::Get { key, .. } => self.get(ctx, key),
            Command::Write { modification, .. } if ctx.is_in_tx_scope() => self.tx_write(ctx, modification),
            Command::Write { modification, .. } => self.non_tx_write(ctx, modification),
            Command::Invalidate { keys, .. } => {
                for key in keys {
                    self.container.remove(key);
                }
                Ok(Response::None)
            }
            Command::Commit { .. } | Command::VersionedCommit { .. } => self.commit(ctx),
            Command::Rollback { .. } => {
                tx_of(ctx)?.clear_looked_up();
                Ok(Response::None)
            }
            Command::Prepare(_)
            | Command::VersionedPrepare { .. }
            | Command::LockControl(_)
            | Command::MultiKeyLockControl(_) => Ok(Response::None),
        }
    }
}

impl fmt::Debug for CallInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallInterceptor")
            .field("entries", &self.container.len())
            .finish()
    }
}
