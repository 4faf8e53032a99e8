//! Consistent hash ring
//!
//! Each member occupies one or more positions on a 64-bit ring (its xxh3
//! hash, plus one per extra virtual node). A key is owned by the members met
//! walking clockwise from the key's own hash, skipping members already
//! collected, until `num_owners` distinct members are found.
//!
//! # Determinism
//!
//! Positions are sorted by `(position, address)`, so the same member set
//! yields the same ring regardless of the order members were listed in, and
//! position collisions resolve identically on every member. The ring is
//! immutable; a view change builds a new one.
//!
//! # Example
//!
//! ```
//! use gridkv_core::{Address, Key};
//! use gridkv_distribution::ConsistentHash;
//!
//! let ring = ConsistentHash::new(["a", "b", "c"].map(Address::new));
//! let owners = ring.locate(&Key::from("user:1"), 2);
//! assert_eq!(owners.len(), 2);
//! assert_eq!(owners, ring.locate(&Key::from("user:1"), 2));
//! ```

use crate::hash::{hash_address, hash_key};
use gridkv_core::{Address, AddressCollection, Key};
use std::collections::BTreeMap;
use xxhash_rust::xxh3::xxh3_64;

/// Immutable ring for one cluster view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistentHash {
    /// Members sorted by address
    members: AddressCollection,
    /// `(position, member)` sorted ascending
    positions: Vec<(u64, Address)>,
}

impl ConsistentHash {
    /// Build a ring with one position per member
    pub fn new(members: impl IntoIterator<Item = Address>) -> Self {
        Self::with_virtual_nodes(members, 1)
    }

    /// Build a ring with `virtual_nodes` positions per member
    ///
    /// The first position of a member is always the hash of its name.
    pub fn with_virtual_nodes(members: impl IntoIterator<Item = Address>, virtual_nodes: usize) -> Self {
        let virtual_nodes = virtual_nodes.max(1);
        let members: AddressCollection = members.into_iter().collect();
        let members = members.sorted();

        let mut positions = Vec::with_capacity(members.len() * virtual_nodes);
        for member in &members {
            positions.push((hash_address(member), member.clone()));
            for i in 1..virtual_nodes {
                let label = format!("{}#{}", member.name(), i);
                positions.push((xxh3_64(label.as_bytes()), member.clone()));
            }
        }
        positions.sort();

        Self { members, positions }
    }

    /// Members sorted by address
    pub fn members(&self) -> &AddressCollection {
        &self.members
    }

    /// Members in the order of their first ring position
    pub fn members_in_ring_order(&self) -> AddressCollection {
        self.positions.iter().map(|(_, a)| a.clone()).collect()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the ring has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Owners of `key`, primary first
    ///
    /// Returns `min(num_owners, len())` distinct members.
    pub fn locate(&self, key: &Key, num_owners: usize) -> Vec<Address> {
        let wanted = num_owners.min(self.members.len());
        let mut owners: Vec<Address> = Vec::with_capacity(wanted);
        if wanted == 0 {
            return owners;
        }

        let h = hash_key(key);
        let start = self.positions.partition_point(|(p, _)| *p < h);
        let n = self.positions.len();
        for step in 0..n {
            let (_, member) = &self.positions[(start + step) % n];
            if !owners.contains(member) {
                owners.push(member.clone());
                if owners.len() == wanted {
                    break;
                }
            }
        }
        owners
    }

    /// Owners of every key
    pub fn locate_all<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a Key>,
        num_owners: usize,
    ) -> BTreeMap<Key, Vec<Address>> {
        keys.into_iter()
            .map(|k| (k.clone(), self.locate(k, num_owners)))
            .collect()
    }

    /// First owner of `key`
    pub fn primary_owner(&self, key: &Key) -> Option<Address> {
        self.locate(key, 1).into_iter().next()
    }

    /// Check if `address` is among the owners of `key`
    pub fn is_owner(&self, address: &Address, key: &Key, num_owners: usize) -> bool {
        self.locate(key, num_owners).contains(address)
    }
}
