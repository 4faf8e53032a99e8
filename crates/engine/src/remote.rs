//! Commands arriving from other members
//!
//! The [`RemoteCommandHandler`] turns a frame into a command, builds the
//! context the command needs and runs it through the local pipeline.
//!
//! A prepare creates the remote transaction, or reuses the one an earlier
//! lock request created, and fills in its write-set before the pipeline
//! sees it. A prepare the recovery manager already knows is answered
//! without running again. Commit and rollback of a transaction this member
//! never saw succeed with nothing to do: the originator sends them to every
//! recipient of a prepare, including those the prepare never reached.

use crate::command::{decode_command, encode_response, Command, Response};
use crate::interceptor::InterceptorChain;
use crate::notify::Notifier;
use crate::recovery::RecoveryManager;
use crate::transport::RpcHandler;
use gridkv_concurrency::{ContextFactory, TransactionTable};
use gridkv_core::{Address, GlobalTransaction, Result};
use gridkv_distribution::Ownership;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Runs commands sent by other members
pub struct RemoteCommandHandler {
    chain: Arc<InterceptorChain>,
    table: Arc<TransactionTable>,
    factory: Arc<ContextFactory>,
    ownership: Arc<Ownership>,
    recovery: Arc<dyn RecoveryManager>,
    notifier: Arc<dyn Notifier>,
}

impl RemoteCommandHandler {
    /// Create over the member's pipeline
    pub fn new(
        chain: Arc<InterceptorChain>,
        table: Arc<TransactionTable>,
        factory: Arc<ContextFactory>,
        ownership: Arc<Ownership>,
        recovery: Arc<dyn RecoveryManager>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            chain,
            table,
            factory,
            ownership,
            recovery,
            notifier,
        }
    }

    /// Run `command` sent by `origin`
    pub fn handle(&self, origin: &Address, command: &Command) -> Result<Response> {
        trace!(%origin, id = command.command_id(), "remote command");
        match command {
            Command::Prepare(prepare) | Command::VersionedPrepare { prepare, .. } => {
                if self.recovery.is_prepared(&prepare.gtx) {
                    debug!(gtx = %prepare.gtx, "already prepared, skipping");
                    return Ok(Response::None);
                }
                let (tx, existed) = self
                    .table
                    .get_or_create_remote(&prepare.gtx, self.ownership.view_id());
                tx.set_modifications(prepare.modifications.clone());
                if let Command::VersionedPrepare { versions_seen, .. } = command {
                    tx.set_versions_seen(versions_seen.clone());
                }
                if !existed {
                    self.notifier.transaction_registered(&prepare.gtx, false);
                }
                let mut ctx = self.factory.create_tx(tx, Some(origin.clone()));
                let result = self.chain.invoke(&mut ctx, command);
                if result.is_ok() && !prepare.one_phase_commit {
                    self.recovery.record_prepared(&prepare.gtx);
                }
                result
            }
            Command::Commit { gtx } | Command::VersionedCommit { gtx, .. } | Command::Rollback { gtx } => {
                self.complete(origin, gtx, command)
            }
            Command::LockControl(lock) | Command::MultiKeyLockControl(lock) => {
                let (tx, existed) = self
                    .table
                    .get_or_create_remote(&lock.gtx, self.ownership.view_id());
                let mut ctx = self.factory.create_tx(tx, Some(origin.clone()));
                let result = self.chain.invoke(&mut ctx, command);
                if result.is_err() && !existed {
                    self.table.remove(&lock.gtx, false);
                }
                result
            }
            Command::Get { .. } | Command::Write { .. } | Command::Invalidate { .. } => {
                let mut ctx = self.factory.create_non_tx(Some(origin.clone()));
                self.chain.invoke(&mut ctx, command)
            }
        }
    }

    fn complete(&self, origin: &Address, gtx: &GlobalTransaction, command: &Command) -> Result<Response> {
        let Some(tx) = self.table.get_remote(gtx) else {
            debug!(%gtx, id = command.command_id(), "no such transaction here");
            self.recovery.forget(gtx);
            return Ok(Response::None);
        };
        let mut ctx = self.factory.create_tx(tx, Some(origin.clone()));
        let result = self.chain.invoke(&mut ctx, command);
        self.recovery.forget(gtx);
        result
    }
}

impl RpcHandler for RemoteCommandHandler {
    fn handle_frame(&self, origin: &Address, frame: &[u8]) -> Vec<u8> {
        let outcome = decode_command(frame).and_then(|command| self.handle(origin, &command));
        encode_response(&outcome).unwrap_or_else(|e| {
            warn!(%origin, error = %e, "cannot encode reply");
            Vec::new()
        })
    }
}

impl fmt::Debug for RemoteCommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCommandHandler")
            .field("local", self.ownership.local_address())
            .field("chain", &self.chain)
            .finish()
    }
}
