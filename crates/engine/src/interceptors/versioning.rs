//! Entry versioning and the write-skew check
//!
//! Versions are computed by the primary owner of a key while it holds the
//! key's lock, so they form a single history per key. A prepare from a
//! remote originator answers with the versions computed here; the
//! originator gathers them and ships them with the commit so every owner
//! stamps the same version. A non-transactional write reaches the primary
//! before any version is computed, and its copies carry the result.
//!
//! With the write-skew check on, the primary owner compares each version the
//! transaction read against the current one before anything else happens.
//! Any difference fails the prepare.

use super::{is_replica_copy, tx_of};
use crate::command::{Command, PrepareCommand, Response};
use crate::interceptor::{Interceptor, Next};
use gridkv_concurrency::{CacheTransaction, InvocationContext};
use gridkv_core::{
    EntryVersionsMap, Error, Key, Modification, Result, VectorClock, VersionComparison,
    VersionGenerator,
};
use gridkv_distribution::Ownership;
use gridkv_storage::DataContainer;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Version stamping stage, installed when versioning is enabled
pub struct VersioningInterceptor {
    ownership: Arc<Ownership>,
    container: Arc<DataContainer>,
    generator: Arc<dyn VersionGenerator>,
    write_skew_check: bool,
}

impl VersioningInterceptor {
    /// Create with the member's version generator
    pub fn new(
        ownership: Arc<Ownership>,
        container: Arc<DataContainer>,
        generator: Arc<dyn VersionGenerator>,
        write_skew_check: bool,
    ) -> Self {
        Self {
            ownership,
            container,
            generator,
            write_skew_check,
        }
    }

    fn next_version(&self, current: Option<&VectorClock>) -> VectorClock {
        match current {
            Some(v) => self.generator.increment(v),
            None => self.generator.generate_new(),
        }
    }

    fn check_write_skew(&self, tx: &CacheTransaction) -> Result<()> {
        for (key, seen) in tx.versions_seen().iter() {
            if !self.ownership.is_primary_owner(key) {
                continue;
            }
            let current = self
                .container
                .version(key)
                .unwrap_or_else(|| self.generator.non_existing());
            let comparison = current.compare(seen);
            trace!(gtx = %tx.gtx(), key = %key, ?comparison, "write skew check");
            if comparison != VersionComparison::Equal {
                debug!(gtx = %tx.gtx(), key = %key, "write skew detected");
                return Err(Error::WriteSkew {
                    key: key.clone(),
                    detail: format!("read at {} but current version is {}", seen, current),
                });
            }
        }
        Ok(())
    }

    /// Versions for the written keys this member stamps
    ///
    /// Under one-phase commit no versions travel with a commit, so every
    /// owner stamps its own copy.
    fn prepared_versions(&self, prepare: &PrepareCommand) -> EntryVersionsMap {
        let mut versions = EntryVersionsMap::new();
        for key in prepare.modifications.affected_keys() {
            let stamps = if prepare.one_phase_commit {
                self.ownership.is_owner(&key)
            } else {
                self.ownership.is_primary_owner(&key)
            };
            if stamps {
                let version = self.next_version(self.container.version(&key).as_ref());
                versions.insert(key, version);
            }
        }
        versions
    }

    fn prepare(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        prepare: &PrepareCommand,
        next: Next<'_>,
    ) -> Result<Response> {
        let tx = tx_of(ctx)?;
        if self.write_skew_check {
            self.check_write_skew(&tx)?;
        }
        let response = next.invoke(ctx, command)?;
        let versions = self.prepared_versions(prepare);
        tx.merge_updated_versions(&versions);
        if ctx.is_origin_local() {
            Ok(response)
        } else {
            Ok(Response::Versions(versions))
        }
    }

    fn write_version(&self, ctx: &InvocationContext, key: &Key) -> VectorClock {
        let current = ctx
            .lookup_entry(key)
            .and_then(|e| e.version().cloned())
            .or_else(|| self.container.version(key));
        self.next_version(current.as_ref())
    }

    fn non_tx_write(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        modification: &Modification,
        versions: &EntryVersionsMap,
        next: Next<'_>,
    ) -> Result<Response> {
        if !is_replica_copy(ctx, modification.flags()) {
            let mut computed = EntryVersionsMap::new();
            for key in modification.affected_keys() {
                let version = self.write_version(ctx, &key);
                computed.insert(key, version);
            }
            ctx.merge_updated_versions(&computed);
        } else {
            ctx.merge_updated_versions(versions);
        }
        next.invoke(ctx, command)
    }
}

impl Interceptor for VersioningInterceptor {
    fn name(&self) -> &'static str {
        "versioning"
    }

    fn handle(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        next: Next<'_>,
    ) -> Result<Response> {
        match command {
            Command::Prepare(p) | Command::VersionedPrepare { prepare: p, .. } => {
                self.prepare(ctx, command, p, next)
            }
            Command::VersionedCommit { updated_versions, .. } => {
                if !ctx.is_origin_local() {
                    ctx.merge_updated_versions(updated_versions);
                }
                next.invoke(ctx, command)
            }
            Command::Write {
                modification,
                versions,
            } if !ctx.is_in_tx_scope() => self.non_tx_write(ctx, command, modification, versions, next),
            _ => next.invoke(ctx, command),
        }
    }
}

impl fmt::Debug for VersioningInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersioningInterceptor")
            .field("write_skew_check", &self.write_skew_check)
            .finish()
    }
}
