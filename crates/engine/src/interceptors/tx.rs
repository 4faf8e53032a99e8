//! Transaction boundaries
//!
//! Drives the [`TxStatus`] state machine of the transaction behind a
//! context: prepare moves it through `Preparing` to `Prepared`, commit to
//! `Committed`, rollback to `RolledBack`. Finished transactions leave the
//! table and are reported to the [`Notifier`].
//!
//! A prepare flagged for one-phase commit runs the commit through the rest
//! of the pipeline as soon as the prepare succeeds.

use super::tx_of;
use crate::command::{Command, Response};
use crate::interceptor::{Interceptor, Next};
use crate::notify::Notifier;
use gridkv_concurrency::{CacheTransaction, InvocationContext, TransactionTable, TxStatus};
use gridkv_core::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Transaction state machine stage
pub struct TxInterceptor {
    table: Arc<TransactionTable>,
    notifier: Arc<dyn Notifier>,
    versioning: bool,
}

impl TxInterceptor {
    /// Create over the member's transaction table
    pub fn new(table: Arc<TransactionTable>, notifier: Arc<dyn Notifier>, versioning: bool) -> Self {
        Self {
            table,
            notifier,
            versioning,
        }
    }

    fn prepare(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        one_phase_commit: bool,
        next: Next<'_>,
    ) -> Result<Response> {
        let tx = tx_of(ctx)?;
        tx.check_not_marked()?;
        tx.transition(TxStatus::Preparing)?;
        if one_phase_commit {
            tx.set_one_phase_commit();
        }

        let response = next.invoke(ctx, command)?;
        tx.transition(TxStatus::Prepared)?;
        debug!(gtx = %tx.gtx(), one_phase_commit, "transaction prepared");

        if one_phase_commit {
            let commit = if self.versioning {
                Command::VersionedCommit {
                    gtx: tx.gtx().clone(),
                    updated_versions: tx.updated_versions(),
                }
            } else {
                Command::Commit {
                    gtx: tx.gtx().clone(),
                }
            };
            self.finish_commit(ctx, &commit, &tx, next)?;
        }
        Ok(response)
    }

    fn commit(&self, ctx: &mut InvocationContext, command: &Command, next: Next<'_>) -> Result<Response> {
        let tx = tx_of(ctx)?;
        tx.check_not_marked()?;
        if tx.status() != TxStatus::Prepared {
            return Err(Error::IllegalTransactionState(format!(
                "{} cannot commit from {:?}",
                tx.gtx(),
                tx.status()
            )));
        }
        self.finish_commit(ctx, command, &tx, next)
    }

    fn finish_commit(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        tx: &Arc<CacheTransaction>,
        next: Next<'_>,
    ) -> Result<Response> {
        match next.invoke(ctx, command) {
            Ok(response) => {
                tx.transition(TxStatus::Committed)?;
                self.complete(tx, true);
                Ok(response)
            }
            Err(e) => {
                warn!(gtx = %tx.gtx(), error = %e, "commit failed");
                if let Err(te) = tx.transition(TxStatus::RolledBack) {
                    warn!(gtx = %tx.gtx(), error = %te, "cannot mark failed commit rolled back");
                }
                self.complete(tx, false);
                Err(e)
            }
        }
    }

    fn rollback(&self, ctx: &mut InvocationContext, command: &Command, next: Next<'_>) -> Result<Response> {
        let tx = tx_of(ctx)?;
        let result = next.invoke(ctx, command);
        if let Err(e) = tx.transition(TxStatus::RolledBack) {
            warn!(gtx = %tx.gtx(), error = %e, "rollback after completion");
        }
        self.complete(&tx, false);
        result
    }

    fn write(&self, ctx: &mut InvocationContext, command: &Command, next: Next<'_>) -> Result<Response> {
        let tx = tx_of(ctx)?;
        tx.check_not_marked()?;
        if tx.status() != TxStatus::Active {
            return Err(Error::IllegalTransactionState(format!(
                "{} is {:?}, no further writes accepted",
                tx.gtx(),
                tx.status()
            )));
        }
        let response = next.invoke(ctx, command)?;
        if let Command::Write { modification, .. } = command {
            if ctx.is_origin_local() && response.is_successful() {
                tx.add_modification(modification.clone());
            }
        }
        Ok(response)
    }

    fn complete(&self, tx: &CacheTransaction, committed: bool) {
        if self.table.remove(tx.gtx(), committed).is_some() {
            debug!(gtx = %tx.gtx(), committed, "transaction completed");
            self.notifier.transaction_completed(tx.gtx(), committed);
        }
    }
}

impl Interceptor for TxInterceptor {
    fn name(&self) -> &'static str {
        "tx"
    }

    fn handle(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        next: Next<'_>,
    ) -> Result<Response> {
        match command {
            Command::Prepare(p) | Command::VersionedPrepare { prepare: p, .. } => {
                self.prepare(ctx, command, p.one_phase_commit, next)
            }
            Command::Commit { .. } | Command::VersionedCommit { .. } => self.commit(ctx, command, next),
            Command::Rollback { .. } => self.rollback(ctx, command, next),
            Command::Write { .. } if ctx.is_in_tx_scope() => self.write(ctx, command, next),
            _ => next.invoke(ctx, command),
        }
    }
}

impl fmt::Debug for TxInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxInterceptor")
            .field("versioning", &self.versioning)
            .finish()
    }
}
