//! Cache entries
//!
//! Two shapes of entry exist:
//! - [`InternalCacheEntry`]: what the data container and persistence hold
//! - [`CacheEntry`]: the mutable copy an invocation context or transaction
//!   works on before committing it

use crate::key::Key;
use crate::metadata::Metadata;
use crate::value::Value;
use crate::version::VectorClock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Stored entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalCacheEntry {
    /// Key
    pub key: Key,
    /// Value
    pub value: Value,
    /// Expiration and version
    pub metadata: Metadata,
    /// Write time
    pub created: DateTime<Utc>,
}

impl InternalCacheEntry {
    /// Create an entry written now
    pub fn new(key: Key, value: Value, metadata: Metadata) -> Self {
        Self {
            key,
            value,
            metadata,
            created: Utc::now(),
        }
    }

    /// Version of the entry, if versioned
    pub fn version(&self) -> Option<&VectorClock> {
        self.metadata.version.as_ref()
    }

    /// Check if the lifespan elapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.metadata.lifespan_ms {
            Some(ms) => self.created + ChronoDuration::milliseconds(ms as i64) <= now,
            None => false,
        }
    }

    /// Check if the lifespan elapsed
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Working copy of an entry inside a context or transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    key: Key,
    value: Option<Value>,
    metadata: Metadata,
    changed: bool,
    removed: bool,
}

impl CacheEntry {
    /// Wrap what the container returned for `key`
    pub fn wrap(key: Key, stored: Option<InternalCacheEntry>) -> Self {
        match stored {
            Some(e) => Self {
                key,
                value: Some(e.value),
                metadata: e.metadata,
                changed: false,
                removed: false,
            },
            None => Self::absent(key),
        }
    }

    /// Entry for a key with no value
    pub fn absent(key: Key) -> Self {
        Self {
            key,
            value: None,
            metadata: Metadata::default(),
            changed: false,
            removed: false,
        }
    }

    /// Key
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Current value
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Version the entry was read at
    pub fn version(&self) -> Option<&VectorClock> {
        self.metadata.version.as_ref()
    }

    /// Set a new value
    pub fn set_value(&mut self, value: Value, metadata: Metadata) {
        let version = self.metadata.version.take();
        self.value = Some(value);
        self.metadata = Metadata { version, ..metadata };
        self.changed = true;
        self.removed = false;
    }

    /// Mark the entry removed
    pub fn remove(&mut self) {
        self.value = None;
        self.changed = true;
        self.removed = true;
    }

    /// Check if the entry was written
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Check if the entry was removed
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Check if there is no value
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}
