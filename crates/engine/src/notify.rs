//! Transaction notifications
//!
//! Listener dispatch lives outside the grid; the pipeline only reports two
//! events through the narrow [`Notifier`] interface.

use gridkv_core::GlobalTransaction;

/// Receives transaction lifecycle events
pub trait Notifier: Send + Sync {
    /// A transaction became known to this member
    fn transaction_registered(&self, _gtx: &GlobalTransaction, _is_origin_local: bool) {}

    /// A transaction finished on this member
    fn transaction_completed(&self, _gtx: &GlobalTransaction, _committed: bool) {}
}

/// Notifier that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {}
