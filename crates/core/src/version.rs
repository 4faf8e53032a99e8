//! Vector clock versions
//!
//! Every entry written by the grid carries a [`VectorClock`]: a map from
//! member address to a per-member counter. Clocks are immutable; incrementing
//! produces a new clock, so a reader can never observe a half-updated one.
//!
//! ## Comparison
//!
//! Clocks form a partial order. Comparison scans the union of both address
//! sets, treating an absent address as counter zero:
//!
//! | ahead | behind | result |
//! |-------|--------|--------|
//! | no | no | `Equal` |
//! | yes | no | `After` |
//! | no | yes | `Before` |
//! | yes | yes | `Conflicting` |
//!
//! Counters are always at least 1, so an address present on only one side
//! always makes that side ahead. Two clocks over disjoint address sets are
//! therefore `Conflicting`, never `Equal`.

use crate::address::Address;
use crate::error::{Error, Result};
use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of comparing two versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionComparison {
    /// This version happened before the other
    Before,
    /// This version happened after the other
    After,
    /// Both versions are identical
    Equal,
    /// Neither version dominates
    Conflicting,
}

impl VersionComparison {
    /// Result of the comparison taken from the other side
    ///
    /// # Examples
    ///
    /// ```
    /// use gridkv_core::VersionComparison;
    ///
    /// assert_eq!(VersionComparison::Before.inverse(), VersionComparison::After);
    /// assert_eq!(VersionComparison::Conflicting.inverse(), VersionComparison::Conflicting);
    /// ```
    pub fn inverse(self) -> Self {
        match self {
            VersionComparison::Before => VersionComparison::After,
            VersionComparison::After => VersionComparison::Before,
            other => other,
        }
    }
}

/// Immutable vector clock
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorClock {
    counters: BTreeMap<Address, u64>,
}

impl VectorClock {
    /// Clock with no entries
    ///
    /// Stands for "never written": it compares `Before` any clock produced by
    /// a generator and `Equal` only to another empty clock.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Counter recorded for an address, zero when absent
    pub fn counter(&self, address: &Address) -> u64 {
        self.counters.get(address).copied().unwrap_or(0)
    }

    /// Check if the clock has no entries
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Number of addresses with a counter
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Iterate `(address, counter)` pairs in address order
    pub fn iter(&self) -> impl Iterator<Item = (&Address, u64)> {
        self.counters.iter().map(|(a, c)| (a, *c))
    }

    /// New clock with `address` counter one higher
    pub fn incremented(&self, address: &Address) -> VectorClock {
        let mut counters = self.counters.clone();
        *counters.entry(address.clone()).or_insert(0) += 1;
        VectorClock { counters }
    }

    /// Compare against another clock
    pub fn compare(&self, other: &VectorClock) -> VersionComparison {
        let mut ahead = false;
        let mut behind = false;

        for (address, &mine) in &self.counters {
            let theirs = other.counter(address);
            if mine > theirs {
                ahead = true;
            } else if mine < theirs {
                behind = true;
            }
        }
        for (address, &theirs) in &other.counters {
            if !self.counters.contains_key(address) && theirs > 0 {
                behind = true;
            }
        }

        match (ahead, behind) {
            (false, false) => VersionComparison::Equal,
            (true, false) => VersionComparison::After,
            (false, true) => VersionComparison::Before,
            (true, true) => VersionComparison::Conflicting,
        }
    }

    /// Compare against an optional clock
    ///
    /// Comparing against nothing is an `InvalidArgument` error.
    pub fn compare_to(&self, other: Option<&VectorClock>) -> Result<VersionComparison> {
        match other {
            Some(other) => Ok(self.compare(other)),
            None => Err(Error::InvalidArgument(
                "cannot compare a version against null".to_string(),
            )),
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (address, counter)) in self.counters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", address, counter)?;
        }
        f.write_str("}")
    }
}

/// Produces versions attributed to the local member
pub trait VersionGenerator: Send + Sync {
    /// Version for a key written for the first time
    fn generate_new(&self) -> VectorClock;

    /// Version following `version`, written by the local member
    fn increment(&self, version: &VectorClock) -> VectorClock;

    /// Version standing for an absent entry
    fn non_existing(&self) -> VectorClock {
        VectorClock::empty()
    }
}

/// Vector clock generator bound to the local address
#[derive(Debug, Clone)]
pub struct VectorClockGenerator {
    local: Address,
}

impl VectorClockGenerator {
    /// Create a generator for the given member
    pub fn new(local: Address) -> Self {
        Self { local }
    }

    /// Member this generator stamps versions for
    pub fn local_address(&self) -> &Address {
        &self.local
    }
}

impl VersionGenerator for VectorClockGenerator {
    fn generate_new(&self) -> VectorClock {
        VectorClock::empty().incremented(&self.local)
    }

    fn increment(&self, version: &VectorClock) -> VectorClock {
        version.incremented(&self.local)
    }
}

/// Versions keyed by cache key
///
/// Used both for the versions a transaction observed and for the versions
/// computed during prepare.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryVersionsMap {
    versions: BTreeMap<Key, VectorClock>,
}

impl EntryVersionsMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a version, replacing any previous one
    pub fn insert(&mut self, key: Key, version: VectorClock) {
        self.versions.insert(key, version);
    }

    /// Record a version only if the key has none yet
    pub fn insert_if_absent(&mut self, key: Key, version: VectorClock) {
        self.versions.entry(key).or_insert(version);
    }

    /// Version recorded for a key
    pub fn get(&self, key: &Key) -> Option<&VectorClock> {
        self.versions.get(key)
    }

    /// Check if a key has a version
    pub fn contains_key(&self, key: &Key) -> bool {
        self.versions.contains_key(key)
    }

    /// Copy every entry of `other` into this map
    pub fn merge(&mut self, other: &EntryVersionsMap) {
        for (key, version) in &other.versions {
            self.versions.insert(key.clone(), version.clone());
        }
    }

    /// Iterate in key order
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &VectorClock)> {
        self.versions.iter()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
