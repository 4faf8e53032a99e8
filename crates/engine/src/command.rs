//! Replicable commands and their wire format
//!
//! Every operation that enters the interceptor pipeline is a [`Command`]. The
//! same value is what travels between members, so each variant carries
//! exactly the fields a participant needs to replay it.
//!
//! ## Wire ids
//!
//! | Id | Command |
//! |----|---------|
//! | 3 | `LockControl` |
//! | 4 | `Get` |
//! | 5 | `Clear` (a write) |
//! | 6 | `Invalidate` |
//! | 8 | `PutKeyValue` (a write) |
//! | 9 | `PutMap` (a write) |
//! | 10 | `Remove` (a write) |
//! | 11 | `Replace` (a write) |
//! | 12 | `Prepare` |
//! | 13 | `Rollback` |
//! | 14 | `Commit` |
//! | 25 | `ApplyDelta` (a write) |
//! | 26 | `VersionedPrepare` |
//! | 27 | `VersionedCommit` |
//! | 29 | `MultiKeyLockControl` |
//!
//! Ids are part of the wire contract and are never reassigned.
//!
//! ## Frame format
//!
//! ```text
//! ┌────────┬──────────────┬──────────────────────┐
//! │ id: u8 │ len: u32 BE  │ payload: MessagePack │
//! └────────┴──────────────┴──────────────────────┘
//! ```
//!
//! A reply is the MessagePack encoding of `Result<Response, Error>`, so a
//! failure on a participant is raised again with the same kind on the
//! originator.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use gridkv_core::{
    EntryVersionsMap, Error, Flag, FlagSet, GlobalTransaction, InternalCacheEntry, Key,
    KeyCollection, Modification, ModificationCollection, Result,
};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Stable command ids
pub mod ids {
    pub use gridkv_core::modification::{
        APPLY_DELTA_COMMAND_ID as APPLY_DELTA, CLEAR_COMMAND_ID as CLEAR,
        PUT_KEY_VALUE_COMMAND_ID as PUT_KEY_VALUE, PUT_MAP_COMMAND_ID as PUT_MAP,
        REMOVE_COMMAND_ID as REMOVE, REPLACE_COMMAND_ID as REPLACE,
    };

    /// Explicit lock of one key
    pub const LOCK_CONTROL: u8 = 3;
    /// Read of one key
    pub const GET: u8 = 4;
    /// Removal of keys from memory
    pub const INVALIDATE: u8 = 6;
    /// First phase of two-phase commit
    pub const PREPARE: u8 = 12;
    /// Abort
    pub const ROLLBACK: u8 = 13;
    /// Second phase of two-phase commit
    pub const COMMIT: u8 = 14;
    /// Prepare carrying the versions the originator read
    pub const VERSIONED_PREPARE: u8 = 26;
    /// Commit carrying the versions computed at prepare
    pub const VERSIONED_COMMIT: u8 = 27;
    /// Explicit lock of several keys
    pub const MULTI_KEY_LOCK_CONTROL: u8 = 29;

    /// Check if `id` names a known command
    pub fn is_known(id: u8) -> bool {
        matches!(
            id,
            LOCK_CONTROL
                | GET
                | CLEAR
                | INVALIDATE
                | PUT_KEY_VALUE
                | PUT_MAP
                | REMOVE
                | REPLACE
                | PREPARE
                | ROLLBACK
                | COMMIT
                | APPLY_DELTA
                | VERSIONED_PREPARE
                | VERSIONED_COMMIT
                | MULTI_KEY_LOCK_CONTROL
        )
    }
}

/// Frame header size: id + length
pub const HEADER_SIZE: usize = 5;

/// Largest accepted payload
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

// ============================================================================
// Commands
// ============================================================================

/// Explicit lock request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockControlCommand {
    /// Requesting transaction
    pub gtx: GlobalTransaction,
    /// Keys to lock or unlock
    pub keys: KeyCollection,
    /// Release instead of acquire
    pub unlock: bool,
    /// Flags
    pub flags: FlagSet,
}

/// First phase of two-phase commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareCommand {
    /// Transaction being prepared
    pub gtx: GlobalTransaction,
    /// Write-set
    pub modifications: ModificationCollection,
    /// Commit right after a successful prepare
    pub one_phase_commit: bool,
}

/// A pipeline operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Read one key
    Get {
        /// Key
        key: Key,
        /// Flags
        flags: FlagSet,
    },
    /// Apply one write
    Write {
        /// The write
        modification: Modification,
        /// Versions the originator computed, for members replaying it
        versions: EntryVersionsMap,
    },
    /// Drop keys from memory
    Invalidate {
        /// Keys
        keys: KeyCollection,
        /// Flags
        flags: FlagSet,
    },
    /// Explicit lock of one key
    LockControl(LockControlCommand),
    /// Explicit lock of several keys
    MultiKeyLockControl(LockControlCommand),
    /// First phase of two-phase commit
    Prepare(PrepareCommand),
    /// Prepare with the versions the originator read
    VersionedPrepare {
        /// Prepare fields
        prepare: PrepareCommand,
        /// Versions observed by the originator's reads
        versions_seen: EntryVersionsMap,
    },
    /// Second phase of two-phase commit
    Commit {
        /// Transaction
        gtx: GlobalTransaction,
    },
    /// Commit with the versions computed at prepare
    VersionedCommit {
        /// Transaction
        gtx: GlobalTransaction,
        /// Versions to stamp the written entries with
        updated_versions: EntryVersionsMap,
    },
    /// Abort
    Rollback {
        /// Transaction
        gtx: GlobalTransaction,
    },
}

impl Command {
    /// Non-transactional or transactional write with no precomputed versions
    pub fn write(modification: Modification) -> Self {
        Command::Write {
            modification,
            versions: EntryVersionsMap::new(),
        }
    }

    /// Read of `key`
    pub fn get(key: Key) -> Self {
        Command::Get {
            key,
            flags: FlagSet::empty(),
        }
    }

    /// Wire id
    pub fn command_id(&self) -> u8 {
        match self {
            Command::Get { .. } => ids::GET,
            Command::Write { modification, .. } => modification.command_id(),
            Command::Invalidate { .. } => ids::INVALIDATE,
            Command::LockControl(_) => ids::LOCK_CONTROL,
            Command::MultiKeyLockControl(_) => ids::MULTI_KEY_LOCK_CONTROL,
            Command::Prepare(_) => ids::PREPARE,
            Command::VersionedPrepare { .. } => ids::VERSIONED_PREPARE,
            Command::Commit { .. } => ids::COMMIT,
            Command::VersionedCommit { .. } => ids::VERSIONED_COMMIT,
            Command::Rollback { .. } => ids::ROLLBACK,
        }
    }

    /// Transaction the command belongs to, for boundary and lock commands
    pub fn gtx(&self) -> Option<&GlobalTransaction> {
        match self {
            Command::LockControl(c) | Command::MultiKeyLockControl(c) => Some(&c.gtx),
            Command::Prepare(p) | Command::VersionedPrepare { prepare: p, .. } => Some(&p.gtx),
            Command::Commit { gtx }
            | Command::VersionedCommit { gtx, .. }
            | Command::Rollback { gtx } => Some(gtx),
            _ => None,
        }
    }

    /// Prepare fields of a prepare command
    pub fn as_prepare(&self) -> Option<&PrepareCommand> {
        match self {
            Command::Prepare(p) | Command::VersionedPrepare { prepare: p, .. } => Some(p),
            _ => None,
        }
    }

    /// Check if this is a prepare, commit or rollback
    pub fn is_tx_boundary(&self) -> bool {
        matches!(
            self,
            Command::Prepare(_)
                | Command::VersionedPrepare { .. }
                | Command::Commit { .. }
                | Command::VersionedCommit { .. }
                | Command::Rollback { .. }
        )
    }

    /// Check if this is a commit
    pub fn is_commit(&self) -> bool {
        matches!(self, Command::Commit { .. } | Command::VersionedCommit { .. })
    }

    /// Flags
    pub fn flags(&self) -> FlagSet {
        match self {
            Command::Get { flags, .. } | Command::Invalidate { flags, .. } => *flags,
            Command::Write { modification, .. } => modification.flags(),
            Command::LockControl(c) | Command::MultiKeyLockControl(c) => c.flags,
            _ => FlagSet::empty(),
        }
    }

    /// Check if the command must stay on the member executing it
    pub fn is_local_only(&self) -> bool {
        self.flags().contains(Flag::CacheModeLocal)
    }

    /// Keys the command reads or writes
    ///
    /// Empty for boundary commands and for a clear.
    pub fn affected_keys(&self) -> KeyCollection {
        match self {
            Command::Get { key, .. } => KeyCollection::from_iter([key.clone()]),
            Command::Write { modification, .. } => modification.affected_keys(),
            Command::Invalidate { keys, .. } => keys.clone(),
            Command::LockControl(c) | Command::MultiKeyLockControl(c) => c.keys.clone(),
            _ => KeyCollection::new(),
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Result of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Nothing to report
    None,
    /// Outcome of a conditional write
    Bool(bool),
    /// Entry read, `None` when absent
    Entry(Option<InternalCacheEntry>),
    /// Versions computed by a participant during prepare
    Versions(EntryVersionsMap),
}

impl Response {
    /// Boolean outcome, `true` unless this is `Bool(false)`
    pub fn is_successful(&self) -> bool {
        !matches!(self, Response::Bool(false))
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Response::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Entry payload
    pub fn into_entry(self) -> Option<InternalCacheEntry> {
        match self {
            Response::Entry(e) => e,
            _ => None,
        }
    }

    /// Versions payload
    pub fn into_versions(self) -> EntryVersionsMap {
        match self {
            Response::Versions(v) => v,
            _ => EntryVersionsMap::new(),
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

fn frame_error(detail: impl std::fmt::Display) -> Error {
    Error::Serialization(format!("malformed frame: {}", detail))
}

/// Encode a command into a frame
pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    let payload =
        rmp_serde::to_vec(command).map_err(|e| Error::Serialization(e.to_string()))?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(frame_error(format!("payload of {} bytes is too large", payload.len())));
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.write_u8(command.command_id()).map_err(frame_error)?;
    frame
        .write_u32::<BigEndian>(payload.len() as u32)
        .map_err(frame_error)?;
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a frame into a command
///
/// Unknown ids fail with [`Error::UnknownCommand`] before the payload is
/// looked at.
pub fn decode_command(frame: &[u8]) -> Result<Command> {
    let mut cursor = Cursor::new(frame);
    let id = cursor
        .read_u8()
        .map_err(|_| frame_error("missing command id"))?;
    if !ids::is_known(id) {
        return Err(Error::UnknownCommand(id));
    }
    let len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| frame_error("missing payload length"))? as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(frame_error(format!("payload of {} bytes is too large", len)));
    }
    let payload = &frame[HEADER_SIZE..];
    if payload.len() != len {
        return Err(frame_error(format!(
            "header announces {} bytes, frame carries {}",
            len,
            payload.len()
        )));
    }
    let command: Command =
        rmp_serde::from_slice(payload).map_err(|e| Error::Serialization(e.to_string()))?;
    if command.command_id() != id {
        return Err(frame_error(format!(
            "id {} does not match payload id {}",
            id,
            command.command_id()
        )));
    }
    Ok(command)
}

/// Encode the outcome of a command
pub fn encode_response(outcome: &Result<Response>) -> Result<Vec<u8>> {
    rmp_serde::to_vec(outcome).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a reply, raising a remote failure as a local error
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let outcome: std::result::Result<Response, Error> =
        rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
    outcome
}
