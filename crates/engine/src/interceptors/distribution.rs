//! Replication and remote reads
//!
//! Only operations that started on this member leave it. Each one runs
//! through the rest of the local pipeline first, then reaches the members
//! that must see it:
//!
//! | Command | Recipients |
//! |---------|------------|
//! | non-transactional write | other owners of the written keys |
//! | prepare | other owners of the write-set, recorded as participants |
//! | commit, rollback | participants |
//! | invalidate | every other member |
//!
//! A non-transactional write is applied first by the primary owner of its
//! keys (the coordinator in replicated mode), under the primary's lock. A
//! member that is not the primary forwards the write there and returns the
//! primary's answer. The primary then replicates, so concurrent writers of
//! a key are serialized in one place and every copy ends up the same. A
//! multi-key write spanning several primaries is split per primary.
//!
//! A clear reaches every other member. Replicated writes carry the versions
//! computed by the primary and the `CacheModeLocal` flag, so recipients
//! apply them without replicating again.
//!
//! In distributed mode a member reading a key it does not own asks the
//! owners, primary first, and keeps the answer in the context: later reads
//! in the same transaction see the same entry.

use super::tx_of;
use crate::command::{Command, PrepareCommand, Response};
use crate::interceptor::{Interceptor, Next};
use crate::rpc::RpcDispatcher;
use gridkv_concurrency::{CacheTransaction, InvocationContext};
use gridkv_core::{
    Address, AddressCollection, CacheEntry, Error, Flag, FlagSet, Key, KeyCollection,
    Modification, Result, Value,
};
use gridkv_distribution::{CacheMode, Ownership};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Clustering stage
pub struct DistributionInterceptor {
    ownership: Arc<Ownership>,
    rpc: RpcDispatcher,
}

impl DistributionInterceptor {
    /// Create over the member's ownership and dispatcher
    pub fn new(ownership: Arc<Ownership>, rpc: RpcDispatcher) -> Self {
        Self { ownership, rpc }
    }

    /// Members other than this one that must apply a write to `keys`
    fn recipients(&self, keys: &KeyCollection, clear: bool) -> AddressCollection {
        if keys.is_empty() && !clear {
            return AddressCollection::new();
        }
        match self.ownership.mode() {
            CacheMode::Local => AddressCollection::new(),
            CacheMode::Replicated => self.ownership.other_members(),
            CacheMode::Distributed if clear => self.ownership.other_members(),
            CacheMode::Distributed => {
                let mut owners = self.ownership.owners_of(keys.iter());
                owners.remove(self.ownership.local_address());
                owners
            }
        }
    }

    fn needs_remote_read(&self, ctx: &InvocationContext, key: &Key) -> bool {
        self.ownership.mode() == CacheMode::Distributed
            && !self.ownership.is_owner(key)
            && ctx.lookup_entry(key).is_none()
    }

    /// Fetch `key` from its owners into the context
    fn remote_get(&self, ctx: &mut InvocationContext, key: &Key) -> Result<()> {
        let command = Command::Get {
            key: key.clone(),
            flags: FlagSet::of(Flag::CacheModeLocal),
        };
        let mut last_error = None;
        for owner in self.ownership.owners(key) {
            match self.rpc.invoke(&owner, &command) {
                Ok(response) => {
                    trace!(key = %key, %owner, "remote read");
                    return ctx.put_looked_up(CacheEntry::wrap(key.clone(), response.into_entry()));
                }
                Err(e) => {
                    debug!(key = %key, %owner, error = %e, "remote read failed, trying next owner");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Transport(format!("no owner for {}", key))))
    }

    fn prefetch(&self, ctx: &mut InvocationContext, modification: &Modification) -> Result<()> {
        if !modification.reads_current_value() {
            return Ok(());
        }
        for key in modification.affected_keys() {
            if self.needs_remote_read(ctx, &key) {
                self.remote_get(ctx, &key)?;
            }
        }
        Ok(())
    }

    /// Primary owner of each group of `modification`'s keys
    ///
    /// Only a map write can name keys with different primaries; it is split
    /// into one map write per primary. Clears stay whole.
    fn split_by_primary(&self, modification: &Modification) -> Vec<(Address, Modification)> {
        let local = self.ownership.local_address().clone();
        let primary = |key: &Key| self.ownership.primary_owner(key).unwrap_or_else(|| local.clone());
        match modification {
            Modification::Clear { .. } => vec![(local, modification.clone())],
            Modification::PutMap {
                entries,
                metadata,
                flags,
            } => {
                let mut groups: BTreeMap<Address, Vec<(Key, Value)>> = BTreeMap::new();
                for (key, value) in entries {
                    groups.entry(primary(key)).or_default().push((key.clone(), value.clone()));
                }
                groups
                    .into_iter()
                    .map(|(owner, entries)| {
                        let part = Modification::PutMap {
                            entries,
                            metadata: metadata.clone(),
                            flags: *flags,
                        };
                        (owner, part)
                    })
                    .collect()
            }
            _ => {
                let owner = modification
                    .affected_keys()
                    .iter()
                    .next()
                    .map(primary)
                    .unwrap_or(local);
                vec![(owner, modification.clone())]
            }
        }
    }

    /// Route a write that started here to the primary owner of its keys
    fn non_tx_write(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        modification: &Modification,
        next: Next<'_>,
    ) -> Result<Response> {
        let mut parts = self.split_by_primary(modification);
        if parts.len() == 1 {
            let (owner, _) = &parts[0];
            if owner == self.ownership.local_address() {
                return self.primary_write(ctx, command, modification, next);
            }
            trace!(%owner, id = command.command_id(), "forwarding write to primary owner");
            return self.rpc.invoke(owner, command);
        }

        debug!(parts = parts.len(), "splitting write by primary owner");
        let local = self.ownership.local_address().clone();
        let mut response = Response::None;
        if let Some(i) = parts.iter().position(|(owner, _)| *owner == local) {
            let (_, part) = parts.swap_remove(i);
            let command = Command::write(part.clone());
            response = self.primary_write(ctx, &command, &part, next)?;
        }
        for (owner, part) in parts {
            response = self.rpc.invoke(&owner, &Command::write(part))?;
        }
        Ok(response)
    }

    /// Apply a write as its primary owner, then replicate it
    fn primary_write(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        modification: &Modification,
        next: Next<'_>,
    ) -> Result<Response> {
        let response = next.invoke(ctx, command)?;
        if !response.is_successful() {
            return Ok(response);
        }
        let targets = self.recipients(&modification.affected_keys(), modification.is_clear());
        if !targets.is_empty() {
            let replicated = Command::Write {
                modification: modification.clone().with_flag(Flag::CacheModeLocal),
                versions: ctx.updated_versions(),
            };
            debug!(targets = targets.len(), id = command.command_id(), "replicating write");
            self.rpc.invoke_all(&targets, &replicated)?;
        }
        Ok(response)
    }

    fn prepare(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        prepare: &PrepareCommand,
        next: Next<'_>,
    ) -> Result<Response> {
        let response = next.invoke(ctx, command)?;
        let tx = tx_of(ctx)?;
        let targets = self.recipients(
            &prepare.modifications.affected_keys(),
            prepare.modifications.contains_clear(),
        );
        if targets.is_empty() {
            return Ok(response);
        }
        tx.add_participants(&targets);
        debug!(gtx = %tx.gtx(), participants = targets.len(), "sending prepare");
        for (member, reply) in self.rpc.invoke_all(&targets, command)? {
            if let Response::Versions(versions) = reply {
                trace!(gtx = %tx.gtx(), %member, versions = versions.len(), "versions from participant");
                tx.merge_updated_versions(&versions);
            }
        }
        Ok(response)
    }

    /// Members holding the write-set's locks
    fn lock_holders(&self, tx: &CacheTransaction) -> AddressCollection {
        match self.ownership.mode() {
            CacheMode::Local => AddressCollection::new(),
            CacheMode::Replicated => self.ownership.view().coordinator().cloned().into_iter().collect(),
            CacheMode::Distributed => tx
                .modifications()
                .affected_keys()
                .iter()
                .filter_map(|k| self.ownership.primary_owner(k))
                .collect(),
        }
    }

    /// Commit on the participants, lock holders last
    ///
    /// A lock holder releases the write-set's locks once it commits, letting
    /// the next writer of those keys in. Backups commit first so they never
    /// see that writer's commit ahead of this one.
    fn commit(&self, ctx: &mut InvocationContext, command: &Command, next: Next<'_>) -> Result<Response> {
        let response = next.invoke(ctx, command)?;
        let tx = tx_of(ctx)?;
        if !tx.is_one_phase_commit() {
            let holders = self.lock_holders(&tx);
            let mut backups = tx.participants();
            backups.retain(|m| !holders.contains(m));
            let mut primaries = tx.participants();
            primaries.retain(|m| holders.contains(m));
            let failed = self.rpc.invoke_all_best_effort(&backups, command)
                + self.rpc.invoke_all_best_effort(&primaries, command);
            if failed > 0 {
                warn!(gtx = %tx.gtx(), failed, "commit did not reach every participant");
            }
        }
        Ok(response)
    }

    fn rollback(&self, ctx: &mut InvocationContext, command: &Command, next: Next<'_>) -> Result<Response> {
        let result = next.invoke(ctx, command);
        let tx = tx_of(ctx)?;
        let participants = tx.participants();
        if !participants.is_empty() {
            debug!(gtx = %tx.gtx(), participants = participants.len(), "sending rollback");
            self.rpc.invoke_all_best_effort(&participants, command);
        }
        result
    }
}

impl Interceptor for DistributionInterceptor {
    fn name(&self) -> &'static str {
        "distribution"
    }

    fn handle(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        next: Next<'_>,
    ) -> Result<Response> {
        if command.is_local_only() {
            return next.invoke(ctx, command);
        }
        if !ctx.is_origin_local() {
            return match command {
                Command::Write { modification, .. } if !ctx.is_in_tx_scope() => {
                    self.primary_write(ctx, command, modification, next)
                }
                _ => next.invoke(ctx, command),
            };
        }
        match command {
            Command::Get { key, .. } => {
                if self.needs_remote_read(ctx, key) {
                    self.remote_get(ctx, key)?;
                }
                next.invoke(ctx, command)
            }
            Command::Write { modification, .. } if ctx.is_in_tx_scope() => {
                self.prefetch(ctx, modification)?;
                next.invoke(ctx, command)
            }
            Command::Write { modification, .. } => self.non_tx_write(ctx, command, modification, next),
            Command::Prepare(p) | Command::VersionedPrepare { prepare: p, .. } => {
                self.prepare(ctx, command, p, next)
            }
            Command::Commit { .. } | Command::VersionedCommit { .. } => self.commit(ctx, command, next),
            Command::Rollback { .. } => self.rollback(ctx, command, next),
            Command::Invalidate { keys, flags } => {
                let response = next.invoke(ctx, command)?;
                let targets = self.ownership.other_members();
                if !targets.is_empty() {
                    let remote = Command::Invalidate {
                        keys: keys.clone(),
                        flags: flags.with(Flag::CacheModeLocal),
                    };
                    self.rpc.invoke_all(&targets, &remote)?;
                }
                Ok(response)
            }
            Command::LockControl(_) | Command::MultiKeyLockControl(_) => next.invoke(ctx, command),
        }
    }
}

impl fmt::Debug for DistributionInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionInterceptor")
            .field("mode", &self.ownership.mode())
            .field("view_id", &self.ownership.view_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{decode_command, encode_response};
    use crate::interceptor::InterceptorChain;
    use crate::interceptors::testing::{prepare, put, replace};
    use crate::interceptors::CallInterceptor;
    use crate::transport::{RpcHandler, Transport, ViewListener};
    use gridkv_concurrency::{ContextFactory, TransactionTable};
    use gridkv_core::{
        Address, EntryVersionsMap, InternalCacheEntry, Metadata, Value, VectorClock,
    };
    use gridkv_distribution::ClusterView;
    use gridkv_persistence::LoaderManager;
    use gridkv_storage::DataContainer;
    use parking_lot::Mutex;
    use std::sync::Weak;

    /// Transport answering every command from canned replies
    struct Scripted {
        local: Address,
        view: ClusterView,
        sent: Mutex<Vec<(Address, Command)>>,
    }

    impl Scripted {
        fn sent(&self) -> Vec<(Address, Command)> {
            self.sent.lock().clone()
        }
    }

    impl Transport for Scripted {
        fn local_address(&self) -> &Address {
            &self.local
        }

        fn view(&self) -> ClusterView {
            self.view.clone()
        }

        fn invoke(&self, target: &Address, frame: &[u8]) -> Result<Vec<u8>> {
            let command = decode_command(frame)?;
            let reply = match &command {
                Command::Get { key, .. } => Response::Entry(Some(InternalCacheEntry::new(
                    key.clone(),
                    Value::Int(42),
                    Metadata::new(),
                ))),
                Command::Prepare(p) => {
                    let mut versions = EntryVersionsMap::new();
                    for key in p.modifications.affected_keys() {
                        versions.insert(key, VectorClock::empty().incremented(target));
                    }
                    Response::Versions(versions)
                }
                _ => Response::None,
            };
            self.sent.lock().push((target.clone(), command));
            encode_response(&Ok(reply))
        }

        fn register_handler(&self, _handler: Weak<dyn RpcHandler>) {}

        fn add_view_listener(&self, _listener: Weak<dyn ViewListener>) {}
    }

    struct Fixture {
        ownership: Arc<Ownership>,
        transport: Arc<Scripted>,
        table: TransactionTable,
        chain: InterceptorChain,
        factory: ContextFactory,
    }

    fn fixture(mode: CacheMode) -> Fixture {
        fixture_at("a", mode)
    }

    fn fixture_at(local: &str, mode: CacheMode) -> Fixture {
        let a = Address::new(local);
        let view = ClusterView::new(1, ["a", "b", "c"].iter().map(|n| Address::new(*n)));
        let ownership = Arc::new(Ownership::new(a.clone(), mode, 2, 1, view.clone()));
        let transport = Arc::new(Scripted {
            local: a.clone(),
            view,
            sent: Mutex::new(Vec::new()),
        });
        let container = Arc::new(DataContainer::new());
        let chain = InterceptorChain::new(vec![
            Arc::new(DistributionInterceptor::new(
                Arc::clone(&ownership),
                RpcDispatcher::new(Arc::clone(&transport) as Arc<dyn Transport>),
            )) as Arc<dyn Interceptor>,
            Arc::new(CallInterceptor::new(
                container,
                Arc::clone(&ownership),
                Arc::new(LoaderManager::disabled()),
            )),
        ]);
        Fixture {
            ownership,
            transport,
            table: TransactionTable::new(a),
            chain,
            factory: ContextFactory::new(),
        }
    }

    fn key_not_owned(ownership: &Ownership) -> Key {
        (0u64..)
            .map(Key::from)
            .find(|k| !ownership.is_owner(k))
            .unwrap_or_else(|| Key::from(0u64))
    }

    #[test]
    fn test_replicated_write_reaches_other_members() {
        let f = fixture(CacheMode::Replicated);
        f.chain
            .invoke(&mut f.factory.create_non_tx(None), &Command::write(put("k", 1)))
            .unwrap();
        let sent = f.transport.sent();
        let targets: Vec<_> = sent.iter().map(|(t, _)| t.name().to_string()).collect();
        assert_eq!(targets, vec!["b", "c"]);
        assert!(sent.iter().all(|(_, c)| c.is_local_only()));
    }

    #[test]
    fn test_local_only_writes_and_copies_stay_here() {
        let f = fixture(CacheMode::Replicated);
        f.chain
            .invoke(
                &mut f.factory.create_non_tx(None),
                &Command::write(put("k", 1).with_flag(Flag::CacheModeLocal)),
            )
            .unwrap();
        f.chain
            .invoke(
                &mut f.factory.create_non_tx(Some(Address::new("b"))),
                &Command::write(put("k", 1).with_flag(Flag::CacheModeLocal)),
            )
            .unwrap();
        assert!(f.transport.sent().is_empty());
    }

    #[test]
    fn test_write_forwarded_to_coordinator() {
        let f = fixture_at("b", CacheMode::Replicated);
        f.chain
            .invoke(&mut f.factory.create_non_tx(None), &Command::write(put("k", 1)))
            .unwrap();
        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Address::new("a"));
        assert!(!sent[0].1.is_local_only());
    }

    #[test]
    fn test_forwarded_write_replicated_by_primary() {
        let f = fixture(CacheMode::Replicated);
        f.chain
            .invoke(
                &mut f.factory.create_non_tx(Some(Address::new("b"))),
                &Command::write(put("k", 1)),
            )
            .unwrap();
        let sent = f.transport.sent();
        let targets: Vec<_> = sent.iter().map(|(t, _)| t.name().to_string()).collect();
        assert_eq!(targets, vec!["b", "c"]);
        assert!(sent.iter().all(|(_, c)| c.is_local_only()));
    }

    #[test]
    fn test_map_write_split_by_primary() {
        let f = fixture(CacheMode::Distributed);
        let local = Address::new("a");
        let entries: Vec<(Key, Value)> = (0u64..24).map(|i| (Key::from(i), Value::Int(i as i64))).collect();
        let map = Modification::PutMap {
            entries: entries.clone(),
            metadata: Metadata::new(),
            flags: FlagSet::empty(),
        };
        f.chain
            .invoke(&mut f.factory.create_non_tx(None), &Command::write(map))
            .unwrap();

        let mut forwarded = KeyCollection::new();
        for (target, command) in f.transport.sent() {
            let Command::Write { modification, .. } = command else {
                panic!("unexpected command {:?}", command);
            };
            if modification.flags().contains(Flag::CacheModeLocal) {
                continue;
            }
            for key in modification.affected_keys().iter() {
                assert_eq!(f.ownership.primary_owner(key), Some(target.clone()));
                forwarded.add(key.clone());
            }
        }
        for (key, _) in &entries {
            let remote_primary = f.ownership.primary_owner(key) != Some(local.clone());
            assert_eq!(forwarded.contains(key), remote_primary, "key {}", key);
        }
    }

    #[test]
    fn test_failed_replace_not_replicated() {
        let f = fixture(CacheMode::Replicated);
        let response = f
            .chain
            .invoke(&mut f.factory.create_non_tx(None), &Command::write(replace("k", 1, 2)))
            .unwrap();
        assert_eq!(response, Response::Bool(false));
        assert!(f.transport.sent().is_empty());
    }

    #[test]
    fn test_distributed_prepare_reaches_owners_and_collects_versions() {
        let f = fixture(CacheMode::Distributed);
        let key = key_not_owned(&f.ownership);
        let tx = f.table.create_local(1);
        let mut ctx = f.factory.create_tx(Arc::clone(&tx), None);
        let write = Modification::Put {
            key: key.clone(),
            value: Value::Int(1),
            metadata: Metadata::new(),
            flags: FlagSet::empty(),
        };
        f.chain.invoke(&mut ctx, &prepare(tx.gtx(), vec![write], false)).unwrap();

        let owners: AddressCollection = f.ownership.owners(&key).into_iter().collect();
        assert_eq!(tx.participants(), owners);
        assert!(tx.updated_versions().get(&key).is_some());

        f.chain.invoke(&mut ctx, &Command::Commit { gtx: tx.gtx().clone() }).unwrap();
        let commits = f.transport.sent().iter().filter(|(_, c)| c.is_commit()).count();
        assert_eq!(commits, owners.len());
    }

    #[test]
    fn test_one_phase_commit_not_sent_again() {
        let f = fixture(CacheMode::Replicated);
        let tx = f.table.create_local(1);
        tx.set_one_phase_commit();
        let mut ctx = f.factory.create_tx(Arc::clone(&tx), None);
        f.chain.invoke(&mut ctx, &prepare(tx.gtx(), vec![put("k", 1)], true)).unwrap();
        f.chain.invoke(&mut ctx, &Command::Commit { gtx: tx.gtx().clone() }).unwrap();
        assert!(f.transport.sent().iter().all(|(_, c)| !c.is_commit()));
    }

    #[test]
    fn test_rollback_reaches_participants() {
        let f = fixture(CacheMode::Replicated);
        let tx = f.table.create_local(1);
        let mut ctx = f.factory.create_tx(Arc::clone(&tx), None);
        f.chain.invoke(&mut ctx, &prepare(tx.gtx(), vec![put("k", 1)], false)).unwrap();
        f.chain.invoke(&mut ctx, &Command::Rollback { gtx: tx.gtx().clone() }).unwrap();
        let rollbacks = f
            .transport
            .sent()
            .iter()
            .filter(|(_, c)| matches!(c, Command::Rollback { .. }))
            .count();
        assert_eq!(rollbacks, 2);
    }

    #[test]
    fn test_remote_read_is_repeatable() {
        let f = fixture(CacheMode::Distributed);
        let key = key_not_owned(&f.ownership);
        let tx = f.table.create_local(1);
        let mut ctx = f.factory.create_tx(Arc::clone(&tx), None);
        let first = f.chain.invoke(&mut ctx, &Command::get(key.clone())).unwrap();
        let second = f.chain.invoke(&mut ctx, &Command::get(key.clone())).unwrap();
        assert_eq!(first.into_entry().map(|e| e.value), Some(Value::Int(42)));
        assert_eq!(second.into_entry().map(|e| e.value), Some(Value::Int(42)));
        assert_eq!(f.transport.sent().len(), 1);
        assert!(tx.versions_seen().get(&key).is_some());
    }

    #[test]
    fn test_invalidate_reaches_everyone() {
        let f = fixture(CacheMode::Distributed);
        let invalidate = Command::Invalidate {
            keys: KeyCollection::from_iter([Key::from("k")]),
            flags: FlagSet::empty(),
        };
        f.chain.invoke(&mut f.factory.create_non_tx(None), &invalidate).unwrap();
        assert_eq!(f.transport.sent().len(), 2);
    }
}
