//! A grid member
//!
//! [`CacheNode`] wires the pipeline of one member from its configuration and
//! collaborators:
//!
//! ```text
//! partition? → tx → locking → distribution → versioning? → store → call
//! ```
//!
//! The partition stage is installed when partition handling is enabled and
//! the versioning stage when versioning is. The node registers a
//! [`RemoteCommandHandler`] with its transport and listens for view changes:
//! a new view is installed in the ownership table, then evaluated for quorum.
//! When quorum is lost every transaction is marked for rollback, and remote
//! ones are rolled back here since no originator will finish them.

use crate::ambient::AmbientTransactionManager;
use crate::command::{Command, PrepareCommand, Response};
use crate::config::GridConfig;
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::interceptors::{
    CacheStoreInterceptor, CallInterceptor, DistributionInterceptor, OptimisticLockingInterceptor,
    PartitionHandler, PartitionHandlingInterceptor, PartitionState, StoreStats, TxInterceptor,
    VersioningInterceptor,
};
use crate::notify::{NoopNotifier, Notifier};
use crate::recovery::{NoRecovery, RecoveryManager};
use crate::remote::RemoteCommandHandler;
use crate::rpc::RpcDispatcher;
use crate::transport::{RpcHandler, Transport, ViewListener};
use gridkv_concurrency::{
    CacheTransaction, ContextFactory, InvocationContext, LockManager, TableStats,
    TransactionTable, TxStatus,
};
use gridkv_core::{
    Address, EntryVersionsMap, InternalCacheEntry, Key, Modification, Result,
    VectorClockGenerator,
};
use gridkv_distribution::{ClusterView, Ownership, ViewChangedEvent};
use gridkv_persistence::{CacheLoader, LoaderManager, OwnerFilter};
use gridkv_storage::DataContainer;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pluggable collaborators of a node
pub struct Collaborators {
    /// Cache loaders, consulted in order
    pub loaders: Vec<Arc<dyn CacheLoader>>,
    /// Remembers remotely prepared transactions
    pub recovery: Arc<dyn RecoveryManager>,
    /// Transaction lifecycle events
    pub notifier: Arc<dyn Notifier>,
    /// The embedder's transaction manager, if any
    pub ambient: Option<Arc<dyn AmbientTransactionManager>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            loaders: Vec::new(),
            recovery: Arc::new(NoRecovery),
            notifier: Arc::new(NoopNotifier),
            ambient: None,
        }
    }
}

/// Counters of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStats {
    /// Transaction table counters
    pub transactions: TableStats,
    /// Store counters
    pub store: StoreStats,
    /// Locks currently held
    pub locks_held: usize,
    /// Entries in memory
    pub entries: usize,
}

/// One member of the grid
pub struct CacheNode {
    config: GridConfig,
    transport: Arc<dyn Transport>,
    ownership: Arc<Ownership>,
    container: Arc<DataContainer>,
    table: Arc<TransactionTable>,
    locks: Arc<LockManager>,
    factory: Arc<ContextFactory>,
    persistence: Arc<LoaderManager>,
    partition: Option<Arc<PartitionHandler>>,
    store: Arc<CacheStoreInterceptor>,
    notifier: Arc<dyn Notifier>,
    chain: Arc<InterceptorChain>,
    remote: Arc<RemoteCommandHandler>,
}

impl CacheNode {
    /// Build and start a member over `transport`
    pub fn start(
        config: GridConfig,
        transport: Arc<dyn Transport>,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>> {
        let config = config.validated()?;
        let address = transport.local_address().clone();
        let view = transport.view();
        let ownership = Arc::new(Ownership::new(
            address.clone(),
            config.clustering.mode,
            config.clustering.num_owners,
            config.clustering.virtual_nodes,
            view.clone(),
        ));
        let container = Arc::new(DataContainer::new());
        let table = Arc::new(TransactionTable::new(address.clone()));
        let locks = Arc::new(LockManager::new(config.locking.concurrency_level));
        let factory = Arc::new(ContextFactory::new());
        let persistence = Arc::new(LoaderManager::new(
            config.persistence.clone(),
            collaborators.loaders,
        ));
        persistence.start()?;

        let partition = config.partition_handling.enabled.then(|| {
            Arc::new(PartitionHandler::new(
                config.partition_handling.min_nodes_for_primary_partition,
                config.partition_handling.auto_recover_on_merge,
                view.size(),
            ))
        });
        let store = Arc::new(CacheStoreInterceptor::new(
            Arc::clone(&persistence),
            Arc::clone(&container),
            Arc::clone(&ownership),
            collaborators.ambient,
        ));

        let versioning = config.versioning.enabled;
        let mut stages: Vec<Arc<dyn Interceptor>> = Vec::new();
        if let Some(handler) = &partition {
            stages.push(Arc::new(PartitionHandlingInterceptor::new(Arc::clone(handler))));
        }
        stages.push(Arc::new(TxInterceptor::new(
            Arc::clone(&table),
            Arc::clone(&collaborators.notifier),
            versioning,
        )));
        stages.push(Arc::new(OptimisticLockingInterceptor::new(
            Arc::clone(&locks),
            Arc::clone(&ownership),
            Arc::clone(&table),
            Arc::clone(&container),
            config.lock_timeout(),
        )));
        stages.push(Arc::new(DistributionInterceptor::new(
            Arc::clone(&ownership),
            RpcDispatcher::new(Arc::clone(&transport)),
        )));
        if versioning {
            stages.push(Arc::new(VersioningInterceptor::new(
                Arc::clone(&ownership),
                Arc::clone(&container),
                Arc::new(VectorClockGenerator::new(address.clone())),
                config.transaction.write_skew_check,
            )));
        }
        stages.push(Arc::clone(&store) as Arc<dyn Interceptor>);
        stages.push(Arc::new(CallInterceptor::new(
            Arc::clone(&container),
            Arc::clone(&ownership),
            Arc::clone(&persistence),
        )));
        let chain = Arc::new(InterceptorChain::new(stages));

        let remote = Arc::new(RemoteCommandHandler::new(
            Arc::clone(&chain),
            Arc::clone(&table),
            Arc::clone(&factory),
            Arc::clone(&ownership),
            collaborators.recovery,
            Arc::clone(&collaborators.notifier),
        ));

        let node = Arc::new(Self {
            config,
            transport: Arc::clone(&transport),
            ownership,
            container,
            table,
            locks,
            factory,
            persistence,
            partition,
            store,
            notifier: collaborators.notifier,
            chain,
            remote,
        });

        let handler: Arc<dyn RpcHandler> = node.remote.clone();
        transport.register_handler(Arc::downgrade(&handler));
        let listener: Arc<dyn ViewListener> = node.clone();
        transport.add_view_listener(Arc::downgrade(&listener));

        let preloaded = node.preload()?;
        info!(
            address = %address,
            mode = ?node.config.clustering.mode,
            view_id = view.view_id(),
            preloaded,
            stages = ?node.chain.names(),
            "node started"
        );
        Ok(node)
    }

    fn preload(&self) -> Result<usize> {
        let filter = OwnerFilter::new(Arc::clone(&self.ownership));
        let container = &self.container;
        self.persistence
            .preload(&filter, &mut |entry| {
                container.put_entry(entry);
            })
    }

    /// Stop the member's loaders
    pub fn stop(&self) {
        self.persistence.stop();
        info!(address = %self.address(), "node stopped");
    }

    // ------------------------------------------------------------------
    // Non-transactional operations
    // ------------------------------------------------------------------

    /// Run a command outside any transaction
    pub fn execute(&self, command: &Command) -> Result<Response> {
        let mut ctx = self.factory.create_non_tx(None);
        self.chain.invoke(&mut ctx, command)
    }

    /// Read an entry
    pub fn get(&self, key: &Key) -> Result<Option<InternalCacheEntry>> {
        self.execute(&Command::get(key.clone())).map(Response::into_entry)
    }

    /// Apply a single write
    pub fn write(&self, modification: Modification) -> Result<Response> {
        self.execute(&Command::write(modification))
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Start a transaction originating here
    pub fn begin(&self) -> Arc<CacheTransaction> {
        let tx = self.table.create_local(self.ownership.view_id());
        self.notifier.transaction_registered(tx.gtx(), true);
        debug!(gtx = %tx.gtx(), "transaction started");
        tx
    }

    /// Run a command inside `tx`
    pub fn execute_in(&self, tx: &Arc<CacheTransaction>, command: &Command) -> Result<Response> {
        let mut ctx = self.tx_context(tx);
        self.chain.invoke(&mut ctx, command)
    }

    fn tx_context(&self, tx: &Arc<CacheTransaction>) -> InvocationContext {
        self.factory.create_tx(Arc::clone(tx), None)
    }

    /// Commit `tx`
    ///
    /// Prepares the write-set on every owner, then commits it. A failure
    /// anywhere rolls the transaction back before the error is returned. A
    /// transaction that wrote nothing finishes without a prepare.
    pub fn commit(&self, tx: &Arc<CacheTransaction>) -> Result<()> {
        if !tx.has_modifications() {
            return self.finish_read_only(tx);
        }
        let one_phase_commit = self.config.transaction.one_phase_commit;
        let prepare = PrepareCommand {
            gtx: tx.gtx().clone(),
            modifications: tx.modifications(),
            one_phase_commit,
        };
        let prepare = if self.config.versioning.enabled {
            let versions_seen = if self.config.transaction.write_skew_check {
                tx.versions_seen()
            } else {
                EntryVersionsMap::new()
            };
            Command::VersionedPrepare {
                prepare,
                versions_seen,
            }
        } else {
            Command::Prepare(prepare)
        };

        let mut ctx = self.tx_context(tx);
        if let Err(e) = self.chain.invoke(&mut ctx, &prepare) {
            debug!(gtx = %tx.gtx(), error = %e, "prepare failed, rolling back");
            self.rollback_after_failure(&mut ctx, tx);
            return Err(e);
        }
        if one_phase_commit {
            return Ok(());
        }

        let commit = if self.config.versioning.enabled {
            Command::VersionedCommit {
                gtx: tx.gtx().clone(),
                updated_versions: tx.updated_versions(),
            }
        } else {
            Command::Commit {
                gtx: tx.gtx().clone(),
            }
        };
        if let Err(e) = self.chain.invoke(&mut ctx, &commit) {
            warn!(gtx = %tx.gtx(), error = %e, "commit failed, rolling back");
            self.rollback_after_failure(&mut ctx, tx);
            return Err(e);
        }
        Ok(())
    }

    fn finish_read_only(&self, tx: &Arc<CacheTransaction>) -> Result<()> {
        tx.check_not_marked()?;
        tx.transition(TxStatus::Preparing)?;
        tx.transition(TxStatus::Prepared)?;
        tx.transition(TxStatus::Committed)?;
        self.table.remove(tx.gtx(), true);
        tx.notify_on_transaction_finished();
        self.notifier.transaction_completed(tx.gtx(), true);
        debug!(gtx = %tx.gtx(), "read-only transaction finished");
        Ok(())
    }

    fn rollback_after_failure(&self, ctx: &mut InvocationContext, tx: &Arc<CacheTransaction>) {
        let rollback = Command::Rollback {
            gtx: tx.gtx().clone(),
        };
        if let Err(e) = self.chain.invoke(ctx, &rollback) {
            warn!(gtx = %tx.gtx(), error = %e, "rollback after failure did not complete");
        }
    }

    /// Roll `tx` back
    pub fn rollback(&self, tx: &Arc<CacheTransaction>) -> Result<()> {
        let mut ctx = self.tx_context(tx);
        self.chain
            .invoke(
                &mut ctx,
                &Command::Rollback {
                    gtx: tx.gtx().clone(),
                },
            )
            .map(|_| ())
    }

    // ------------------------------------------------------------------
    // Cluster state
    // ------------------------------------------------------------------

    /// Address of this member
    pub fn address(&self) -> &Address {
        self.ownership.local_address()
    }

    /// View currently installed
    pub fn view(&self) -> ClusterView {
        self.ownership.view()
    }

    /// Owners of `key`, primary first
    pub fn owners(&self, key: &Key) -> Vec<Address> {
        self.ownership.owners(key)
    }

    /// Check if this member owns `key`
    pub fn is_owner(&self, key: &Key) -> bool {
        self.ownership.is_owner(key)
    }

    /// Partition state, always `Normal` without partition handling
    pub fn partition_state(&self) -> PartitionState {
        self.partition
            .as_ref()
            .map_or(PartitionState::Normal, |p| p.state())
    }

    /// Report that state transfer after a merge finished
    pub fn confirm_state_transfer(&self) -> bool {
        self.partition
            .as_ref()
            .map_or(false, |p| p.confirm_state_transfer())
    }

    fn rollback_remote_transactions(&self) {
        for tx in self.table.remote_transactions() {
            if !tx.is_marked_for_rollback() {
                continue;
            }
            let origin = tx.gtx().origin().clone();
            let mut ctx = self.factory.create_tx(Arc::clone(&tx), Some(origin));
            let rollback = Command::Rollback {
                gtx: tx.gtx().clone(),
            };
            if let Err(e) = self.chain.invoke(&mut ctx, &rollback) {
                warn!(gtx = %tx.gtx(), error = %e, "remote transaction rollback failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Configuration in effect
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// In-memory entries
    pub fn container(&self) -> &Arc<DataContainer> {
        &self.container
    }

    /// Transaction table
    pub fn transactions(&self) -> &Arc<TransactionTable> {
        &self.table
    }

    /// Lock table
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Store stage
    pub fn store(&self) -> &Arc<CacheStoreInterceptor> {
        &self.store
    }

    /// Loaders of this member
    pub fn persistence(&self) -> &Arc<LoaderManager> {
        &self.persistence
    }

    /// Stage names in invocation order
    pub fn stages(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    /// Counters
    pub fn stats(&self) -> NodeStats {
        NodeStats {
            transactions: self.table.stats(),
            store: self.store.stats(),
            locks_held: self.locks.held_count(),
            entries: self.container.len(),
        }
    }
}

impl ViewListener for CacheNode {
    fn view_changed(&self, event: &ViewChangedEvent) {
        self.ownership.install_view(event.new_view.clone());
        debug!(
            address = %self.address(),
            view_id = event.new_view.view_id(),
            members = event.new_view.size(),
            is_merge = event.is_merge,
            "view installed"
        );
        let Some(partition) = &self.partition else {
            return;
        };
        if let Some(message) = partition.on_view_changed(event) {
            let marked = self.table.handle(message);
            info!(address = %self.address(), marked, "transactions marked for rollback");
            self.rollback_remote_transactions();
        }
    }
}

impl fmt::Debug for CacheNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheNode")
            .field("address", self.address())
            .field("mode", &self.config.clustering.mode)
            .field("view", &self.view())
            .field("chain", &self.chain)
            .field("transport", &Arc::strong_count(&self.transport))
            .finish()
    }
}
