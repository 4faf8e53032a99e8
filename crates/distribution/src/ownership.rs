//! Key ownership for the local member
//!
//! [`Ownership`] answers "who owns this key" for the current view, according
//! to the cache mode:
//!
//! | Mode | Owners | Primary owner |
//! |------|--------|---------------|
//! | `Local` | the local member | the local member |
//! | `Replicated` | every member | the coordinator |
//! | `Distributed` | `num_owners` members from the ring | first ring owner |
//!
//! The topology (view plus ring) sits behind a lock as an `Arc` that is
//! swapped on view change. Readers clone the `Arc` and work on an immutable
//! snapshot, so a lookup never sees a half-built ring.

use crate::ring::ConsistentHash;
use crate::view::ClusterView;
use gridkv_core::{Address, AddressCollection, Key};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// How entries are spread over the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// No clustering
    #[default]
    Local,
    /// Every member holds every entry
    Replicated,
    /// Each entry is held by `num_owners` members
    Distributed,
}

/// View and ring installed together
#[derive(Debug)]
pub struct Topology {
    view: ClusterView,
    ring: ConsistentHash,
}

impl Topology {
    /// The view
    pub fn view(&self) -> &ClusterView {
        &self.view
    }

    /// The ring built from the view
    pub fn ring(&self) -> &ConsistentHash {
        &self.ring
    }
}

/// Ownership decisions for the local member
#[derive(Debug)]
pub struct Ownership {
    local: Address,
    mode: CacheMode,
    num_owners: usize,
    virtual_nodes: usize,
    topology: RwLock<Arc<Topology>>,
}

impl Ownership {
    /// Create with an initial view
    pub fn new(
        local: Address,
        mode: CacheMode,
        num_owners: usize,
        virtual_nodes: usize,
        view: ClusterView,
    ) -> Self {
        let topology = Self::build(view, virtual_nodes);
        Self {
            local,
            mode,
            num_owners: num_owners.max(1),
            virtual_nodes,
            topology: RwLock::new(Arc::new(topology)),
        }
    }

    fn build(view: ClusterView, virtual_nodes: usize) -> Topology {
        let ring = ConsistentHash::with_virtual_nodes(view.members().iter().cloned(), virtual_nodes);
        Topology { view, ring }
    }

    /// Replace the topology with one built from `view`
    pub fn install_view(&self, view: ClusterView) {
        info!(
            local = %self.local,
            view_id = view.view_id(),
            members = view.size(),
            "installing cluster view"
        );
        let topology = Arc::new(Self::build(view, self.virtual_nodes));
        *self.topology.write() = topology;
    }

    /// Snapshot of the current topology
    pub fn topology(&self) -> Arc<Topology> {
        Arc::clone(&*self.topology.read())
    }

    /// Current view
    pub fn view(&self) -> ClusterView {
        self.topology().view().clone()
    }

    /// Current view id
    pub fn view_id(&self) -> u64 {
        self.topology().view().view_id()
    }

    /// The local member
    pub fn local_address(&self) -> &Address {
        &self.local
    }

    /// Cache mode
    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Configured owners per key
    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    /// Check if writes must reach other members
    pub fn is_clustered(&self) -> bool {
        self.mode != CacheMode::Local
    }

    /// Owners of `key`, primary first
    pub fn owners(&self, key: &Key) -> Vec<Address> {
        match self.mode {
            CacheMode::Local => vec![self.local.clone()],
            CacheMode::Replicated => self.topology().view().members().iter().cloned().collect(),
            CacheMode::Distributed => self.topology().ring().locate(key, self.num_owners),
        }
    }

    /// Union of the owners of every key
    pub fn owners_of<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) -> AddressCollection {
        let mut owners = AddressCollection::new();
        for key in keys {
            for owner in self.owners(key) {
                owners.add(owner);
            }
        }
        owners
    }

    /// Primary owner of `key`
    pub fn primary_owner(&self, key: &Key) -> Option<Address> {
        match self.mode {
            CacheMode::Local => Some(self.local.clone()),
            CacheMode::Replicated => self.topology().view().coordinator().cloned(),
            CacheMode::Distributed => self.topology().ring().primary_owner(key),
        }
    }

    /// Check if the local member is the primary owner of `key`
    pub fn is_primary_owner(&self, key: &Key) -> bool {
        self.primary_owner(key).as_ref() == Some(&self.local)
    }

    /// Check if the local member owns `key`
    pub fn is_owner(&self, key: &Key) -> bool {
        match self.mode {
            CacheMode::Local | CacheMode::Replicated => true,
            CacheMode::Distributed => self.owners(key).contains(&self.local),
        }
    }

    /// Members of the current view other than the local one
    pub fn other_members(&self) -> AddressCollection {
        let mut members = self.topology().view().members().clone();
        members.remove(&self.local);
        members
    }
}
