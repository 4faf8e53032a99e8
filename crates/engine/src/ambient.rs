//! Ambient platform transactions
//!
//! An embedder may run grid operations inside a transaction of its own
//! platform. While the store replays a committed write-set, that ambient
//! transaction is suspended so the store's work does not enlist in it, then
//! resumed when the replay ends, whatever its outcome.

use std::fmt;

/// Token for a suspended ambient transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmbientHandle(pub u64);

/// The embedder's transaction manager
pub trait AmbientTransactionManager: Send + Sync {
    /// Check if the calling thread has an active ambient transaction
    fn has_active(&self) -> bool;

    /// Detach the calling thread's ambient transaction, if any
    fn suspend(&self) -> Option<AmbientHandle>;

    /// Reattach a suspended transaction to the calling thread
    fn resume(&self, handle: AmbientHandle);
}

/// Resumes a suspended ambient transaction when dropped
pub struct SuspendGuard<'a> {
    manager: Option<&'a dyn AmbientTransactionManager>,
    handle: Option<AmbientHandle>,
}

impl<'a> SuspendGuard<'a> {
    /// Suspend the calling thread's ambient transaction
    pub fn suspend(manager: Option<&'a dyn AmbientTransactionManager>) -> Self {
        let handle = manager.and_then(|m| m.suspend());
        Self { manager, handle }
    }

    /// Check if something was suspended
    pub fn is_suspended(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if let (Some(manager), Some(handle)) = (self.manager, self.handle.take()) {
            manager.resume(handle);
        }
    }
}

impl fmt::Debug for SuspendGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendGuard")
            .field("handle", &self.handle)
            .finish()
    }
}
