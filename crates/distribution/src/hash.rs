//! Stable hashing of keys and addresses
//!
//! Placement must agree across members and across restarts, so it uses
//! xxh3 over raw bytes rather than the std hasher, which is randomly seeded.

use gridkv_core::{Address, Key};
use xxhash_rust::xxh3::xxh3_64;

/// Ring position of a key
#[inline]
pub fn hash_key(key: &Key) -> u64 {
    xxh3_64(key.as_bytes())
}

/// Ring position of a member
#[inline]
pub fn hash_address(address: &Address) -> u64 {
    xxh3_64(address.as_bytes())
}
