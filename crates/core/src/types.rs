//! Transaction identity
//!
//! A [`GlobalTransaction`] names a transaction across the whole cluster: the
//! member that started it plus a counter unique on that member.

use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster-wide unique transaction identifier
///
/// Ordered by origin then id, so collections of transactions sort the same
/// way on every member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalTransaction {
    origin: Address,
    id: u64,
}

impl GlobalTransaction {
    /// Create an identifier
    ///
    /// # Examples
    ///
    /// ```
    /// use gridkv_core::{Address, GlobalTransaction};
    ///
    /// let gtx = GlobalTransaction::new(Address::new("node-a"), 3);
    /// assert_eq!(gtx.id(), 3);
    /// assert_eq!(gtx.to_string(), "GlobalTx:node-a:3");
    /// ```
    pub fn new(origin: Address, id: u64) -> Self {
        Self { origin, id }
    }

    /// Member that started the transaction
    pub fn origin(&self) -> &Address {
        &self.origin
    }

    /// Counter assigned by the origin
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for GlobalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalTx:{}:{}", self.origin, self.id)
    }
}
