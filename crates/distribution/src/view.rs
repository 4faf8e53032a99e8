//! Cluster membership snapshots

use gridkv_core::{Address, AddressCollection};
use serde::{Deserialize, Serialize};

/// Ordered snapshot of the active members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    view_id: u64,
    members: AddressCollection,
}

impl ClusterView {
    /// Create a view
    pub fn new(view_id: u64, members: impl IntoIterator<Item = Address>) -> Self {
        Self {
            view_id,
            members: members.into_iter().collect(),
        }
    }

    /// View containing only `address`
    pub fn single(address: Address) -> Self {
        Self::new(0, [address])
    }

    /// Topology version
    pub fn view_id(&self) -> u64 {
        self.view_id
    }

    /// Members in view order
    pub fn members(&self) -> &AddressCollection {
        &self.members
    }

    /// First member, the coordinator
    pub fn coordinator(&self) -> Option<&Address> {
        self.members.first()
    }

    /// Check membership
    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    /// Number of members
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Notification that the view changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewChangedEvent {
    /// Members before the change
    pub old_members: AddressCollection,
    /// The installed view
    pub new_view: ClusterView,
    /// Whether separate partitions merged into this view
    pub is_merge: bool,
}

impl ViewChangedEvent {
    /// Create an event
    pub fn new(old_members: AddressCollection, new_view: ClusterView, is_merge: bool) -> Self {
        Self {
            old_members,
            new_view,
            is_merge,
        }
    }

    /// Members after the change
    pub fn new_members(&self) -> &AddressCollection {
        self.new_view.members()
    }

    /// Check if the cluster lost members
    pub fn is_shrink(&self) -> bool {
        self.new_members().len() < self.old_members.len()
    }

    /// Members no longer present
    pub fn left(&self) -> AddressCollection {
        self.old_members
            .iter()
            .filter(|a| !self.new_view.contains(a))
            .cloned()
            .collect()
    }
}
