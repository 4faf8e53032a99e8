//! Per-key lock table
//!
//! Locks are exclusive and owner-reentrant: an owner that already holds a
//! key acquires it again immediately. Acquisition waits up to a timeout;
//! release is unconditional and releasing a lock one does not hold is a
//! no-op, so a retried rollback can release twice safely.
//!
//! ## Striping
//!
//! The table is split into `concurrency_level` stripes chosen by key hash.
//! Each stripe is a mutex-guarded map of held keys plus a condition variable
//! that waiters of that stripe park on. Releasing a key wakes the stripe's
//! waiters, which re-check their own key.

use gridkv_core::{Error, GlobalTransaction, Key, Result};
use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHasher};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use tracing::trace;

/// Holder of a lock
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockOwner {
    /// A transaction, on whichever member runs its prepare
    Transaction(GlobalTransaction),
    /// A single non-transactional invocation
    Invocation(u64),
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOwner::Transaction(gtx) => write!(f, "{}", gtx),
            LockOwner::Invocation(id) => write!(f, "invocation-{}", id),
        }
    }
}

struct Stripe {
    held: Mutex<FxHashMap<Key, LockOwner>>,
    released: Condvar,
}

/// Striped lock table shared by every transaction on a member
pub struct LockManager {
    stripes: Box<[Stripe]>,
}

impl LockManager {
    /// Create a table with `concurrency_level` stripes
    pub fn new(concurrency_level: usize) -> Self {
        let stripes = (0..concurrency_level.max(1))
            .map(|_| Stripe {
                held: Mutex::new(FxHashMap::default()),
                released: Condvar::new(),
            })
            .collect();
        Self { stripes }
    }

    fn stripe(&self, key: &Key) -> &Stripe {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    /// Acquire `key` for `owner`, waiting up to `timeout`
    ///
    /// Returns `Ok(true)` if newly acquired, `Ok(false)` if `owner` already
    /// held it, and `LockTimeout` if another owner kept it past the deadline.
    pub fn acquire(&self, key: &Key, owner: &LockOwner, timeout: Duration) -> Result<bool> {
        let stripe = self.stripe(key);
        let deadline = Instant::now() + timeout;
        let mut held = stripe.held.lock();
        loop {
            match held.get(key) {
                None => {
                    held.insert(key.clone(), owner.clone());
                    trace!(key = %key, owner = %owner, "lock acquired");
                    return Ok(true);
                }
                Some(current) if current == owner => return Ok(false),
                Some(current) => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockTimeout {
                            key: key.clone(),
                            holder: current.to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    stripe.released.wait_until(&mut held, deadline);
                }
            }
        }
    }

    /// Release `key` if `owner` holds it
    ///
    /// Returns `true` if a lock was released.
    pub fn release(&self, key: &Key, owner: &LockOwner) -> bool {
        let stripe = self.stripe(key);
        let mut held = stripe.held.lock();
        if held.get(key) != Some(owner) {
            return false;
        }
        held.remove(key);
        drop(held);
        stripe.released.notify_all();
        trace!(key = %key, owner = %owner, "lock released");
        true
    }

    /// Release every key of `keys` held by `owner`
    pub fn release_all<'a>(&self, keys: impl IntoIterator<Item = &'a Key>, owner: &LockOwner) -> usize {
        keys.into_iter().filter(|k| self.release(k, owner)).count()
    }

    /// Current holder of `key`
    pub fn owner(&self, key: &Key) -> Option<LockOwner> {
        self.stripe(key).held.lock().get(key).cloned()
    }

    /// Check if `key` is held by anyone
    pub fn is_locked(&self, key: &Key) -> bool {
        self.owner(key).is_some()
    }

    /// Check if `key` is held by `owner`
    pub fn is_locked_by(&self, key: &Key, owner: &LockOwner) -> bool {
        self.owner(key).as_ref() == Some(owner)
    }

    /// Number of held locks
    pub fn held_count(&self) -> usize {
        self.stripes.iter().map(|s| s.held.lock().len()).sum()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("stripes", &self.stripes.len())
            .field("held", &self.held_count())
            .finish()
    }
}
