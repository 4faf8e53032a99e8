//! Interceptor pipeline
//!
//! Commands are processed by an ordered list of stages. Each stage sees the
//! command, may act before and after the rest of the pipeline, and decides
//! whether to continue by calling [`Next::invoke`].
//!
//! ```text
//! Partition → Tx → Locking → Distribution → Versioning → CacheStore → Call
//!   outermost                                                     innermost
//! ```
//!
//! Stages are immutable values built with every collaborator they need; the
//! chain itself is never modified after construction.

use crate::command::{Command, Response};
use gridkv_concurrency::InvocationContext;
use gridkv_core::Result;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// One pipeline stage
pub trait Interceptor: Send + Sync {
    /// Stage name, for logs
    fn name(&self) -> &'static str;

    /// Process `command`, calling `next` to continue down the pipeline
    fn handle(
        &self,
        ctx: &mut InvocationContext,
        command: &Command,
        next: Next<'_>,
    ) -> Result<Response>;
}

/// The stages after the current one
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
}

impl<'a> Next<'a> {
    /// Run `command` through the remaining stages
    ///
    /// Past the last stage the result is [`Response::None`]. A stage may call
    /// this more than once, for example to commit right after a prepare.
    pub fn invoke(self, ctx: &mut InvocationContext, command: &Command) -> Result<Response> {
        match self.rest.split_first() {
            Some((stage, rest)) => {
                trace!(stage = stage.name(), id = command.command_id(), "visiting");
                stage.handle(ctx, command, Next { rest })
            }
            None => Ok(Response::None),
        }
    }
}

/// Ordered, immutable list of stages
#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Create from stages, outermost first
    pub fn new(stages: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { stages }
    }

    /// Run `command` through every stage
    pub fn invoke(&self, ctx: &mut InvocationContext, command: &Command) -> Result<Response> {
        Next {
            rest: &self.stages,
        }
        .invoke(ctx, command)
    }

    /// Stage names, outermost first
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Check if there are no stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
