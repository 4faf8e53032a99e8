//! Command dispatch to other members
//!
//! Encodes a [`Command`], sends it through the [`Transport`] and decodes the
//! reply. A failure raised by the participant comes back as the same error.

use crate::command::{decode_response, encode_command, Command, Response};
use crate::transport::Transport;
use gridkv_core::{Address, AddressCollection, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends commands to other members
#[derive(Clone)]
pub struct RpcDispatcher {
    transport: Arc<dyn Transport>,
}

impl RpcDispatcher {
    /// Create over `transport`
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Address of the local member
    pub fn local_address(&self) -> &Address {
        self.transport.local_address()
    }

    /// Send `command` to `target` and wait for its response
    pub fn invoke(&self, target: &Address, command: &Command) -> Result<Response> {
        let frame = encode_command(command)?;
        let reply = self.transport.invoke(target, &frame)?;
        decode_response(&reply)
    }

    /// Send `command` to every target in order, stopping at the first failure
    pub fn invoke_all(
        &self,
        targets: &AddressCollection,
        command: &Command,
    ) -> Result<Vec<(Address, Response)>> {
        let frame = encode_command(command)?;
        let mut responses = Vec::with_capacity(targets.len());
        for target in targets.iter() {
            debug!(%target, id = command.command_id(), "invoking remote command");
            let reply = self.transport.invoke(target, &frame)?;
            responses.push((target.clone(), decode_response(&reply)?));
        }
        Ok(responses)
    }

    /// Send `command` to every target, logging failures instead of returning them
    ///
    /// Returns how many targets failed.
    pub fn invoke_all_best_effort(&self, targets: &AddressCollection, command: &Command) -> usize {
        let mut failed = 0;
        for target in targets.iter() {
            if let Err(e) = self.invoke(target, command) {
                warn!(%target, id = command.command_id(), error = %e, "remote command failed");
                failed += 1;
            }
        }
        failed
    }
}

impl fmt::Debug for RpcDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcDispatcher")
            .field("local", self.local_address())
            .finish()
    }
}
