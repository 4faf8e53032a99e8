//! Cluster member addresses
//!
//! An [`Address`] names one member of the cluster. An [`AddressCollection`]
//! is an ordered, duplicate-free list of addresses, used for views, owner
//! lists and transaction participant sets.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a cluster member
///
/// Addresses are totally ordered by name, which gives every member the same
/// sorted view of any membership set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create an address from a member name
    pub fn new(name: impl Into<String>) -> Self {
        Address(name.into())
    }

    /// Create a unique address for an anonymous member
    ///
    /// # Examples
    ///
    /// ```
    /// use gridkv_core::Address;
    ///
    /// let a = Address::random();
    /// let b = Address::random();
    /// assert_ne!(a, b);
    /// ```
    pub fn random() -> Self {
        Address(format!("node-{}", Uuid::new_v4().simple()))
    }

    /// Member name
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Raw bytes of the name, used for ring placement
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::new(s)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

/// Ordered, duplicate-suppressing list of addresses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCollection {
    addresses: Vec<Address>,
}

impl AddressCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an address unless already present
    ///
    /// Returns `true` if the address was added.
    pub fn add(&mut self, address: Address) -> bool {
        if self.contains(&address) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    /// Append every address of `other` not already present
    pub fn add_all<'a>(&mut self, other: impl IntoIterator<Item = &'a Address>) {
        for address in other {
            self.add(address.clone());
        }
    }

    /// Remove an address, keeping the order of the rest
    pub fn remove(&mut self, address: &Address) -> bool {
        let before = self.addresses.len();
        self.addresses.retain(|a| a != address);
        before != self.addresses.len()
    }

    /// Keep only the addresses matching `f`
    pub fn retain(&mut self, f: impl FnMut(&Address) -> bool) {
        self.addresses.retain(f);
    }

    /// Check membership
    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.iter().any(|a| a == address)
    }

    /// Check that every address of `other` is a member
    pub fn contains_all(&self, other: &AddressCollection) -> bool {
        other.iter().all(|a| self.contains(a))
    }

    /// Address at a position
    pub fn get(&self, index: usize) -> Option<&Address> {
        self.addresses.get(index)
    }

    /// First address
    pub fn first(&self) -> Option<&Address> {
        self.addresses.first()
    }

    /// Position of an address
    pub fn position(&self, address: &Address) -> Option<usize> {
        self.addresses.iter().position(|a| a == address)
    }

    /// Copy of the addresses in `start..end`, clamped to the collection
    pub fn sub_collection(&self, start: usize, end: usize) -> AddressCollection {
        let end = end.min(self.addresses.len());
        let start = start.min(end);
        AddressCollection {
            addresses: self.addresses[start..end].to_vec(),
        }
    }

    /// Copy of the collection sorted by address
    pub fn sorted(&self) -> AddressCollection {
        let mut addresses = self.addresses.clone();
        addresses.sort();
        AddressCollection { addresses }
    }

    /// Number of addresses
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Iterate in order
    pub fn iter(&self) -> std::slice::Iter<'_, Address> {
        self.addresses.iter()
    }

    /// Borrow as a slice
    pub fn as_slice(&self) -> &[Address] {
        &self.addresses
    }

    /// Consume into the underlying vector
    pub fn into_vec(self) -> Vec<Address> {
        self.addresses
    }
}

impl FromIterator<Address> for AddressCollection {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let mut collection = AddressCollection::new();
        for address in iter {
            collection.add(address);
        }
        collection
    }
}

impl IntoIterator for AddressCollection {
    type Item = Address;
    type IntoIter = std::vec::IntoIter<Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.addresses.into_iter()
    }
}

impl<'a> IntoIterator for &'a AddressCollection {
    type Item = &'a Address;
    type IntoIter = std::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.addresses.iter()
    }
}
