//! Write operations
//!
//! A [`Modification`] is one write a transaction records, or one
//! non-transactional write being executed. The same value travels inside
//! prepare commands, so it is serializable and carries its wire command id.

use crate::collections::KeyCollection;
use crate::flags::{Flag, FlagSet};
use crate::key::Key;
use crate::metadata::Metadata;
use crate::value::{Delta, Value};
use serde::{Deserialize, Serialize};

/// Wire id of a clear
pub const CLEAR_COMMAND_ID: u8 = 5;
/// Wire id of a single-key put
pub const PUT_KEY_VALUE_COMMAND_ID: u8 = 8;
/// Wire id of a multi-key put
pub const PUT_MAP_COMMAND_ID: u8 = 9;
/// Wire id of a remove
pub const REMOVE_COMMAND_ID: u8 = 10;
/// Wire id of a conditional replace
pub const REPLACE_COMMAND_ID: u8 = 11;
/// Wire id of an atomic-map delta
pub const APPLY_DELTA_COMMAND_ID: u8 = 25;

/// A write operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modification {
    /// Unconditional write of one key
    Put {
        /// Key
        key: Key,
        /// New value
        value: Value,
        /// Expiration settings
        metadata: Metadata,
        /// Flags
        flags: FlagSet,
    },
    /// Removal of one key
    Remove {
        /// Key
        key: Key,
        /// Flags
        flags: FlagSet,
    },
    /// Write of one key, only if its value equals `expected`
    Replace {
        /// Key
        key: Key,
        /// Value the entry must hold
        expected: Value,
        /// New value
        value: Value,
        /// Expiration settings
        metadata: Metadata,
        /// Flags
        flags: FlagSet,
    },
    /// Unconditional write of several keys
    PutMap {
        /// Keys and values
        entries: Vec<(Key, Value)>,
        /// Expiration settings
        metadata: Metadata,
        /// Flags
        flags: FlagSet,
    },
    /// Field-level update of a map value
    ApplyDelta {
        /// Key of the map
        key: Key,
        /// Field changes
        delta: Delta,
        /// Additional keys that must be locked with the map
        composite_keys: KeyCollection,
        /// Flags
        flags: FlagSet,
    },
    /// Removal of every entry
    Clear {
        /// Flags
        flags: FlagSet,
    },
}

impl Modification {
    /// Wire id of the command carrying this write
    pub fn command_id(&self) -> u8 {
        match self {
            Modification::Put { .. } => PUT_KEY_VALUE_COMMAND_ID,
            Modification::Remove { .. } => REMOVE_COMMAND_ID,
            Modification::Replace { .. } => REPLACE_COMMAND_ID,
            Modification::PutMap { .. } => PUT_MAP_COMMAND_ID,
            Modification::ApplyDelta { .. } => APPLY_DELTA_COMMAND_ID,
            Modification::Clear { .. } => CLEAR_COMMAND_ID,
        }
    }

    /// Flags of the write
    pub fn flags(&self) -> FlagSet {
        match self {
            Modification::Put { flags, .. }
            | Modification::Remove { flags, .. }
            | Modification::Replace { flags, .. }
            | Modification::PutMap { flags, .. }
            | Modification::ApplyDelta { flags, .. }
            | Modification::Clear { flags } => *flags,
        }
    }

    /// Same write with `flag` added
    pub fn with_flag(mut self, flag: Flag) -> Self {
        match &mut self {
            Modification::Put { flags, .. }
            | Modification::Remove { flags, .. }
            | Modification::Replace { flags, .. }
            | Modification::PutMap { flags, .. }
            | Modification::ApplyDelta { flags, .. }
            | Modification::Clear { flags } => flags.insert(flag),
        }
        self
    }

    /// Keys whose values this write changes
    ///
    /// Empty for a clear, which affects whatever the container holds.
    pub fn affected_keys(&self) -> KeyCollection {
        match self {
            Modification::Put { key, .. }
            | Modification::Remove { key, .. }
            | Modification::Replace { key, .. }
            | Modification::ApplyDelta { key, .. } => KeyCollection::from_iter([key.clone()]),
            Modification::PutMap { entries, .. } => {
                entries.iter().map(|(k, _)| k.clone()).collect()
            }
            Modification::Clear { .. } => KeyCollection::new(),
        }
    }

    /// Check if this is a clear
    pub fn is_clear(&self) -> bool {
        matches!(self, Modification::Clear { .. })
    }

    /// Check if the write only succeeds under a condition
    pub fn is_conditional(&self) -> bool {
        matches!(self, Modification::Replace { .. })
    }

    /// Check if the write depends on the current value
    pub fn reads_current_value(&self) -> bool {
        matches!(
            self,
            Modification::Replace { .. } | Modification::ApplyDelta { .. }
        )
    }
}
