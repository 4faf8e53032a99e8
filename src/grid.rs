//! Grid entry point
//!
//! A [`Grid`] is the embedder's handle on one member. Operations outside a
//! transaction take effect on return; inside a [`Transaction`] they are
//! buffered until [`Transaction::commit`].

use crate::error::{Error, Result};
use gridkv_concurrency::{CacheTransaction, TxStatus};
use gridkv_core::{
    Address, Delta, FlagSet, GlobalTransaction, InternalCacheEntry, Key, KeyCollection,
    Metadata, Modification, Value,
};
use gridkv_distribution::ClusterView;
use gridkv_engine::{
    AmbientTransactionManager, CacheNode, Collaborators, Command, GridConfig, NodeStats,
    Notifier, PartitionState, RecoveryManager, Response, StandaloneTransport, Transport,
};
use gridkv_persistence::CacheLoader;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

fn put_modification(key: Key, value: Value, metadata: Metadata) -> Modification {
    Modification::Put {
        key,
        value,
        metadata,
        flags: FlagSet::empty(),
    }
}

fn remove_modification(key: Key) -> Modification {
    Modification::Remove {
        key,
        flags: FlagSet::empty(),
    }
}

fn replace_modification(key: Key, expected: Value, value: Value) -> Modification {
    Modification::Replace {
        key,
        expected,
        value,
        metadata: Metadata::new(),
        flags: FlagSet::empty(),
    }
}

fn put_map_modification<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Modification
where
    K: Into<Key>,
    V: Into<Value>,
{
    Modification::PutMap {
        entries: entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
        metadata: Metadata::new(),
        flags: FlagSet::empty(),
    }
}

fn delta_modification(key: Key, delta: Delta) -> Modification {
    Modification::ApplyDelta {
        key,
        delta,
        composite_keys: KeyCollection::new(),
        flags: FlagSet::empty(),
    }
}

fn clear_modification() -> Modification {
    Modification::Clear {
        flags: FlagSet::empty(),
    }
}

fn replaced(response: Response) -> bool {
    response.as_bool().unwrap_or(false)
}

/// Handle on one grid member
///
/// # Example
///
/// ```ignore
/// use gridkv::prelude::*;
///
/// let grid = Grid::local()?;
/// grid.put("user:1", "alice")?;
///
/// let tx = grid.begin()?;
/// tx.put("user:2", "bob")?;
/// tx.commit()?;
/// ```
#[derive(Clone)]
pub struct Grid {
    node: Arc<CacheNode>,
}

impl Grid {
    /// Start a standalone member with default settings
    pub fn local() -> Result<Self> {
        Self::builder().build()
    }

    /// Builder for a configured member
    pub fn builder() -> GridBuilder {
        GridBuilder::new()
    }

    /// Underlying member
    pub fn node(&self) -> &Arc<CacheNode> {
        &self.node
    }

    /// Store `value` under `key`
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        self.put_with(key, value, Metadata::new())
    }

    /// Store `value` under `key` with explicit metadata, such as a lifespan
    pub fn put_with(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
        metadata: Metadata,
    ) -> Result<()> {
        self.node
            .write(put_modification(key.into(), value.into(), metadata))?;
        Ok(())
    }

    /// Read the value under `key`
    pub fn get(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        Ok(self.get_entry(key)?.map(|e| e.value))
    }

    /// Read the entry under `key`, with its metadata
    pub fn get_entry(&self, key: impl Into<Key>) -> Result<Option<InternalCacheEntry>> {
        Ok(self.node.get(&key.into())?)
    }

    /// Remove `key`
    pub fn remove(&self, key: impl Into<Key>) -> Result<()> {
        self.node.write(remove_modification(key.into()))?;
        Ok(())
    }

    /// Replace the value under `key` if it currently equals `expected`
    pub fn replace(
        &self,
        key: impl Into<Key>,
        expected: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<bool> {
        let response = self.node.write(replace_modification(
            key.into(),
            expected.into(),
            value.into(),
        ))?;
        Ok(replaced(response))
    }

    /// Store several entries at once
    pub fn put_all<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.node.write(put_map_modification(entries))?;
        Ok(())
    }

    /// Apply field changes to the map stored under `key`
    pub fn apply_delta(&self, key: impl Into<Key>, delta: Delta) -> Result<()> {
        self.node.write(delta_modification(key.into(), delta))?;
        Ok(())
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<()> {
        self.node.write(clear_modification())?;
        Ok(())
    }

    /// Drop `keys` from memory on every member, leaving the stores alone
    pub fn invalidate<K: Into<Key>>(&self, keys: impl IntoIterator<Item = K>) -> Result<()> {
        let command = Command::Invalidate {
            keys: keys.into_iter().map(Into::into).collect(),
            flags: FlagSet::empty(),
        };
        self.node.execute(&command)?;
        Ok(())
    }

    /// Start a transaction
    pub fn begin(&self) -> Result<Transaction> {
        if !self.node.config().transaction.enabled {
            return Err(Error::IllegalState(
                "transactions are disabled for this grid".into(),
            ));
        }
        Ok(Transaction {
            tx: self.node.begin(),
            node: Arc::clone(&self.node),
            finished: false,
        })
    }

    /// Partition state of this member
    pub fn partition_state(&self) -> PartitionState {
        self.node.partition_state()
    }

    /// Report that state transfer after a merge completed
    pub fn confirm_state_transfer(&self) -> bool {
        self.node.confirm_state_transfer()
    }

    /// Owners of `key`, primary first
    pub fn owners(&self, key: impl Into<Key>) -> Vec<Address> {
        self.node.owners(&key.into())
    }

    /// Address of this member
    pub fn address(&self) -> &Address {
        self.node.address()
    }

    /// Installed view
    pub fn view(&self) -> ClusterView {
        self.node.view()
    }

    /// Counters
    pub fn stats(&self) -> NodeStats {
        self.node.stats()
    }

    /// Stop the member's loaders
    pub fn close(&self) {
        self.node.stop();
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid").field("node", &self.node).finish()
    }
}

/// Builder for a [`Grid`]
///
/// ```ignore
/// let cluster = LocalCluster::new();
/// let grid = Grid::builder()
///     .config(GridConfig::clustered(CacheMode::Distributed))
///     .transport(cluster.transport("a"))
///     .build()?;
/// ```
pub struct GridBuilder {
    config: GridConfig,
    address: Option<Address>,
    transport: Option<Arc<dyn Transport>>,
    collaborators: Collaborators,
}

impl GridBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self {
            config: GridConfig::default(),
            address: None,
            transport: None,
            collaborators: Collaborators::default(),
        }
    }

    /// Use `config`
    pub fn config(mut self, config: GridConfig) -> Self {
        self.config = config;
        self
    }

    /// Read the configuration from a TOML file
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config = GridConfig::from_file(path)?;
        Ok(self)
    }

    /// Name of a standalone member
    pub fn address(mut self, name: impl Into<String>) -> Self {
        self.address = Some(Address::new(name));
        self
    }

    /// Join a cluster through `transport`
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Add a cache loader; loaders are consulted in the order added
    pub fn loader(mut self, loader: Arc<dyn CacheLoader>) -> Self {
        self.collaborators.loaders.push(loader);
        self
    }

    /// Use `recovery` to remember remotely prepared transactions
    pub fn recovery(mut self, recovery: Arc<dyn RecoveryManager>) -> Self {
        self.collaborators.recovery = recovery;
        self
    }

    /// Report transaction events to `notifier`
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.collaborators.notifier = notifier;
        self
    }

    /// Suspend transactions of `manager` while the store is written
    pub fn ambient_transactions(mut self, manager: Arc<dyn AmbientTransactionManager>) -> Self {
        self.collaborators.ambient = Some(manager);
        self
    }

    /// Start the member
    pub fn build(self) -> Result<Grid> {
        let transport: Arc<dyn Transport> = match (self.transport, self.address) {
            (Some(transport), Some(address)) if transport.local_address() != &address => {
                return Err(Error::InvalidArgument(format!(
                    "address {} does not match the transport's address {}",
                    address,
                    transport.local_address()
                )));
            }
            (Some(transport), _) => transport,
            (None, address) => Arc::new(StandaloneTransport::new(
                address.unwrap_or_else(|| Address::new("local")),
            )),
        };
        debug!(address = %transport.local_address(), "building grid member");
        let node = CacheNode::start(self.config, transport, self.collaborators)?;
        Ok(Grid { node })
    }
}

impl fmt::Debug for GridBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridBuilder")
            .field("config", &self.config)
            .field("address", &self.address)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

impl Default for GridBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A transaction started with [`Grid::begin`]
///
/// Writes are buffered until [`commit`](Transaction::commit). Reads see the
/// transaction's own writes and repeat: a key read twice yields the same
/// value even if another writer changed it in between. Dropping an
/// unfinished transaction rolls it back.
pub struct Transaction {
    node: Arc<CacheNode>,
    tx: Arc<CacheTransaction>,
    finished: bool,
}

impl Transaction {
    /// Global identifier
    pub fn gtx(&self) -> &GlobalTransaction {
        self.tx.gtx()
    }

    /// Current lifecycle state
    pub fn status(&self) -> TxStatus {
        self.tx.status()
    }

    fn write(&self, modification: Modification) -> Result<Response> {
        Ok(self.node.execute_in(&self.tx, &Command::write(modification))?)
    }

    /// Buffer a store of `value` under `key`
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        self.write(put_modification(key.into(), value.into(), Metadata::new()))?;
        Ok(())
    }

    /// Read `key` as this transaction sees it
    pub fn get(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        let response = self.node.execute_in(&self.tx, &Command::get(key.into()))?;
        Ok(response.into_entry().map(|e| e.value))
    }

    /// Buffer a removal of `key`
    pub fn remove(&self, key: impl Into<Key>) -> Result<()> {
        self.write(remove_modification(key.into()))?;
        Ok(())
    }

    /// Replace the value under `key` if it equals `expected` as seen here
    pub fn replace(
        &self,
        key: impl Into<Key>,
        expected: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<bool> {
        let response = self.write(replace_modification(key.into(), expected.into(), value.into()))?;
        Ok(replaced(response))
    }

    /// Buffer several stores
    pub fn put_all<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.write(put_map_modification(entries))?;
        Ok(())
    }

    /// Buffer field changes to the map under `key`
    pub fn apply_delta(&self, key: impl Into<Key>, delta: Delta) -> Result<()> {
        self.write(delta_modification(key.into(), delta))?;
        Ok(())
    }

    /// Buffer removal of every entry
    pub fn clear(&self) -> Result<()> {
        self.write(clear_modification())?;
        Ok(())
    }

    /// Prepare and commit the buffered writes
    ///
    /// On failure the transaction is already rolled back.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        Ok(self.node.commit(&self.tx)?)
    }

    /// Discard the buffered writes
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        Ok(self.node.rollback(&self.tx)?)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished || self.tx.status().is_terminal() {
            return;
        }
        if let Err(e) = self.node.rollback(&self.tx) {
            warn!(gtx = %self.tx.gtx(), error = %e, "rollback of dropped transaction failed");
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("gtx", self.tx.gtx())
            .field("status", &self.tx.status())
            .finish()
    }
}
