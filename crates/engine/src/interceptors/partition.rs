//! Partition handling
//!
//! When a view shrinks below the quorum threshold the member assumes it is
//! on the minority side of a split and stops serving operations. In-flight
//! transactions are told to roll back through a [`TableMessage`] that the
//! caller delivers to the transaction table.
//!
//! ```text
//!            shrink below quorum              merge view
//!  Normal ─────────────────────▶ ReadOnly ─────────────────▶ AwaitingStateTransfer
//!    ▲                                  │ merge + auto_recover          │
//!    └──────────────────────────────────┴──────── confirm_state_transfer┘
//! ```
//!
//! Rollbacks pass through even while the member refuses everything else, so
//! forced rollbacks can release their locks.

use crate::command::{Command, Response};
use crate::interceptor::{Interceptor, Next};
use gridkv_concurrency::{InvocationContext, TableMessage};
use gridkv_core::{Error, Result};
use gridkv_distribution::ViewChangedEvent;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Availability of a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PartitionState {
    /// Serving operations
    Normal = 0,
    /// Below quorum, refusing operations
    ReadOnly = 1,
    /// Partitions merged, waiting for state transfer to be confirmed
    AwaitingStateTransfer = 2,
}

impl PartitionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PartitionState::ReadOnly,
            2 => PartitionState::AwaitingStateTransfer,
            _ => PartitionState::Normal,
        }
    }

    /// Check if operations are served
    pub fn is_available(self) -> bool {
        self == PartitionState::Normal
    }
}

/// Outcome of a view change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDecision {
    /// State after the view change
    pub next: PartitionState,
    /// Message for the transaction table, if any
    pub message: Option<TableMessage>,
}

/// Owns the partition state of a member
#[derive(Debug)]
pub struct PartitionHandler {
    quorum: usize,
    auto_recover_on_merge: bool,
    state: AtomicU8,
    members: AtomicUsize,
}

impl PartitionHandler {
    /// Create in the `Normal` state
    pub fn new(quorum: usize, auto_recover_on_merge: bool, members: usize) -> Self {
        Self {
            quorum,
            auto_recover_on_merge,
            state: AtomicU8::new(PartitionState::Normal as u8),
            members: AtomicUsize::new(members),
        }
    }

    /// Quorum threshold
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Current state
    pub fn state(&self) -> PartitionState {
        PartitionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Check if operations are served
    pub fn is_available(&self) -> bool {
        self.state().is_available()
    }

    /// Decide the state following `event` from `current`
    ///
    /// Pure: nothing changes until the decision is applied.
    pub fn evaluate(&self, current: PartitionState, event: &ViewChangedEvent) -> PartitionDecision {
        let members = event.new_view.size();
        if event.is_merge {
            let next = if current == PartitionState::Normal || self.auto_recover_on_merge {
                PartitionState::Normal
            } else {
                PartitionState::AwaitingStateTransfer
            };
            return PartitionDecision { next, message: None };
        }
        if event.is_shrink() && members < self.quorum {
            return PartitionDecision {
                next: PartitionState::ReadOnly,
                message: Some(TableMessage::MarkAllForRollback {
                    reason: format!(
                        "cluster partitioned: {} members left, quorum is {}",
                        members, self.quorum
                    ),
                }),
            };
        }
        PartitionDecision {
            next: current,
            message: None,
        }
    }

    /// Evaluate and apply a view change, returning the table message to deliver
    pub fn on_view_changed(&self, event: &ViewChangedEvent) -> Option<TableMessage> {
        self.members.store(event.new_view.size(), Ordering::SeqCst);
        let current = self.state();
        let decision = self.evaluate(current, event);
        if decision.next != current {
            self.state.store(decision.next as u8, Ordering::SeqCst);
            match decision.next {
                PartitionState::ReadOnly => warn!(
                    members = event.new_view.size(),
                    quorum = self.quorum,
                    "quorum lost, entering read-only mode"
                ),
                state => info!(?current, next = ?state, "partition state changed"),
            }
        }
        decision.message
    }

    /// Leave `AwaitingStateTransfer` once state transfer is known to be done
    ///
    /// Returns whether the state changed.
    pub fn confirm_state_transfer(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(
                PartitionState::AwaitingStateTransfer as u8,
                PartitionState::Normal as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if changed {
            info!("state transfer confirmed, serving operations again");
        }
        changed
    }

    /// Error for a refused operation
    pub fn refusal(&self) -> Error {
        Error::NetworkPartition {
            members: self.members.load(Ordering::SeqCst),
            quorum: self.quorum,
        }
    }
}

/// Refuses operations while the member is partitioned
#[derive(Debug)]
pub struct PartitionHandlingInterceptor {
    handler: Arc<PartitionHandler>,
}

impl PartitionHandlingInterceptor {
    /// Create over `handler`
    pub fn new(handler: Arc<PartitionHandler>) -> Self {
        Self { handler }
    }
}

impl Interceptor for PartitionHandlingInterceptor {
    fn name(&self) -> &'static str {
        "partition"
    }

    fn handle(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        next: Next<'_>,
    ) -> Result<Response> {
        if matches!(command, Command::Rollback { .. }) || self.handler.is_available() {
            return next.invoke(ctx, command);
        }
        Err(self.handler.refusal())
    }
}
