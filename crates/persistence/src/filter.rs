//! Ownership-based key filters

use crate::loader::KeyFilter;
use gridkv_core::Key;
use gridkv_distribution::Ownership;
use std::sync::Arc;

/// Accepts keys the local member is primary owner of
#[derive(Debug, Clone)]
pub struct PrimaryOwnerFilter {
    ownership: Arc<Ownership>,
}

impl PrimaryOwnerFilter {
    /// Create for the local member's ownership
    pub fn new(ownership: Arc<Ownership>) -> Self {
        Self { ownership }
    }
}

impl KeyFilter for PrimaryOwnerFilter {
    fn should_load(&self, key: &Key) -> bool {
        self.ownership.is_primary_owner(key)
    }
}

/// Accepts keys the local member owns, primary or backup
#[derive(Debug, Clone)]
pub struct OwnerFilter {
    ownership: Arc<Ownership>,
}

impl OwnerFilter {
    /// Create for the local member's ownership
    pub fn new(ownership: Arc<Ownership>) -> Self {
        Self { ownership }
    }
}

impl KeyFilter for OwnerFilter {
    fn should_load(&self, key: &Key) -> bool {
        self.ownership.is_owner(key)
    }
}
