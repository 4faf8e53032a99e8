//! Per-invocation flags

use serde::{Deserialize, Serialize};

/// Behaviour modifiers attached to a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Flag {
    /// Do not write through to the persistence collaborator
    SkipCacheStore = 1 << 0,
    /// Do not write through when the store is shared between members
    SkipSharedCacheStore = 1 << 1,
    /// Do not acquire locks
    SkipLocking = 1 << 2,
    /// Fail immediately instead of waiting for a held lock
    ZeroLockAcquisitionTimeout = 1 << 3,
    /// Apply on this member only, do not replicate
    CacheModeLocal = 1 << 4,
}

/// Set of [`Flag`]s
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagSet(u16);

impl FlagSet {
    /// No flags
    pub const fn empty() -> Self {
        FlagSet(0)
    }

    /// Set containing a single flag
    pub const fn of(flag: Flag) -> Self {
        FlagSet(flag as u16)
    }

    /// Copy of this set with `flag` added
    pub const fn with(self, flag: Flag) -> Self {
        FlagSet(self.0 | flag as u16)
    }

    /// Add a flag
    pub fn insert(&mut self, flag: Flag) {
        self.0 |= flag as u16;
    }

    /// Check for a flag
    pub const fn contains(self, flag: Flag) -> bool {
        self.0 & flag as u16 != 0
    }

    /// Union of two sets
    pub const fn union(self, other: FlagSet) -> Self {
        FlagSet(self.0 | other.0)
    }

    /// Check if no flag is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Flag> for FlagSet {
    fn from(flag: Flag) -> Self {
        FlagSet::of(flag)
    }
}
