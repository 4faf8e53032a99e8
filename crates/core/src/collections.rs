//! Small ordered collections used by contexts and transactions
//!
//! All three containers keep insertion order and suppress duplicates. They
//! own their storage: cloning one gives an independent copy, which is how a
//! transaction snapshot avoids aliasing the live transaction.
//!
//! - [`KeyCollection`]: keys, inline up to four before spilling to the heap
//! - [`ModificationCollection`]: the write-set of a transaction
//! - [`CacheEntryCollection`]: looked-up entries, unique by key

use crate::entry::CacheEntry;
use crate::key::Key;
use crate::modification::Modification;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Ordered, duplicate-free set of keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCollection {
    keys: SmallVec<[Key; 4]>,
}

impl KeyCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key unless already present
    ///
    /// Returns `true` if the key was added.
    pub fn add(&mut self, key: Key) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.keys.push(key);
        true
    }

    /// Append every key of `other` not already present
    pub fn add_all<'a>(&mut self, other: impl IntoIterator<Item = &'a Key>) {
        for key in other {
            self.add(key.clone());
        }
    }

    /// Remove a key
    pub fn remove(&mut self, key: &Key) -> bool {
        match self.keys.iter().position(|k| k == key) {
            Some(i) => {
                self.keys.remove(i);
                true
            }
            None => false,
        }
    }

    /// Check membership
    pub fn contains(&self, key: &Key) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// Check if any key of `other` is a member
    pub fn contains_any(&self, other: &KeyCollection) -> bool {
        other.iter().any(|k| self.contains(k))
    }

    /// Check if every key of `other` is a member
    pub fn contains_all(&self, other: &KeyCollection) -> bool {
        other.iter().all(|k| self.contains(k))
    }

    /// First key
    pub fn first(&self) -> Option<&Key> {
        self.keys.first()
    }

    /// Stable sort by a derived sort key
    pub fn sort_by_key<T: Ord>(&mut self, f: impl FnMut(&Key) -> T) {
        self.keys.sort_by_cached_key(f);
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate in order
    pub fn iter(&self) -> std::slice::Iter<'_, Key> {
        self.keys.iter()
    }

    /// Remove and return every key
    pub fn take(&mut self) -> KeyCollection {
        std::mem::take(self)
    }
}

impl FromIterator<Key> for KeyCollection {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        let mut collection = KeyCollection::new();
        for key in iter {
            collection.add(key);
        }
        collection
    }
}

impl IntoIterator for KeyCollection {
    type Item = Key;
    type IntoIter = smallvec::IntoIter<[Key; 4]>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl<'a> IntoIterator for &'a KeyCollection {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// Ordered write-set of a transaction
///
/// Writes are kept in execution order; repeated writes to a key are all
/// kept, since replaying them in order yields the final state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationCollection {
    modifications: Vec<Modification>,
}

impl ModificationCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a write
    pub fn add(&mut self, modification: Modification) {
        self.modifications.push(modification);
    }

    /// First write
    pub fn first(&self) -> Option<&Modification> {
        self.modifications.first()
    }

    /// Number of writes
    pub fn len(&self) -> usize {
        self.modifications.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    /// Iterate in execution order
    pub fn iter(&self) -> std::slice::Iter<'_, Modification> {
        self.modifications.iter()
    }

    /// Check if any write is a clear
    pub fn contains_clear(&self) -> bool {
        self.modifications.iter().any(Modification::is_clear)
    }

    /// Keys changed by the writes, flattened, first occurrence order
    pub fn affected_keys(&self) -> KeyCollection {
        let mut keys = KeyCollection::new();
        for m in &self.modifications {
            keys.add_all(&m.affected_keys());
        }
        keys
    }

    /// Check if all writes target the same single key
    pub fn writes_to_single_key(&self) -> bool {
        if self.contains_clear() {
            return false;
        }
        self.affected_keys().len() == 1
    }
}

impl FromIterator<Modification> for ModificationCollection {
    fn from_iter<I: IntoIterator<Item = Modification>>(iter: I) -> Self {
        ModificationCollection {
            modifications: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ModificationCollection {
    type Item = &'a Modification;
    type IntoIter = std::slice::Iter<'a, Modification>;

    fn into_iter(self) -> Self::IntoIter {
        self.modifications.iter()
    }
}

/// Looked-up entries, unique by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntryCollection {
    entries: Vec<CacheEntry>,
}

impl CacheEntryCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing one with an equal key
    pub fn put(&mut self, entry: CacheEntry) {
        match self.entries.iter_mut().find(|e| e.key() == entry.key()) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    /// Entry for a key
    pub fn get(&self, key: &Key) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.key() == key)
    }

    /// Mutable entry for a key
    pub fn get_mut(&mut self, key: &Key) -> Option<&mut CacheEntry> {
        self.entries.iter_mut().find(|e| e.key() == key)
    }

    /// Remove the entry for a key
    pub fn remove(&mut self, key: &Key) -> Option<CacheEntry> {
        let i = self.entries.iter().position(|e| e.key() == key)?;
        Some(self.entries.remove(i))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, CacheEntry> {
        self.entries.iter()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
