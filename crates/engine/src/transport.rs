//! Transport collaborator and the in-process cluster
//!
//! The pipeline needs three things from a transport: the local address, the
//! current view, and a way to send a frame to a member and wait for its
//! reply. View changes are pushed to registered [`ViewListener`]s.
//!
//! [`LocalCluster`] embeds several members in one process. Frames are handed
//! to the target's handler on the calling thread; a member outside the
//! sender's view is unreachable, which is how tests model a partition.
//!
//! ```text
//! LocalCluster
//!   ├── "a" → InProcessTransport ─ Weak<dyn RpcHandler>, view, listeners
//!   ├── "b" → InProcessTransport ─ ...
//!   └── "c" → InProcessTransport ─ ...
//! ```

use gridkv_core::{Address, AddressCollection, Error, Result};
use gridkv_distribution::{ClusterView, ViewChangedEvent};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Receives frames addressed to a member
pub trait RpcHandler: Send + Sync {
    /// Process a frame from `origin` and produce the reply bytes
    fn handle_frame(&self, origin: &Address, frame: &[u8]) -> Vec<u8>;
}

/// Receives view changes
pub trait ViewListener: Send + Sync {
    /// A new view was installed
    fn view_changed(&self, event: &ViewChangedEvent);
}

/// Member-to-member messaging
pub trait Transport: Send + Sync {
    /// Address of the local member
    fn local_address(&self) -> &Address;

    /// Current view
    fn view(&self) -> ClusterView;

    /// Send `frame` to `target` and wait for the reply
    fn invoke(&self, target: &Address, frame: &[u8]) -> Result<Vec<u8>>;

    /// Install the handler for incoming frames
    fn register_handler(&self, handler: Weak<dyn RpcHandler>);

    /// Register for view changes
    fn add_view_listener(&self, listener: Weak<dyn ViewListener>);
}

/// Transport of a member that is alone
#[derive(Debug, Clone)]
pub struct StandaloneTransport {
    address: Address,
}

impl StandaloneTransport {
    /// Create for `address`
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

impl Transport for StandaloneTransport {
    fn local_address(&self) -> &Address {
        &self.address
    }

    fn view(&self) -> ClusterView {
        ClusterView::single(self.address.clone())
    }

    fn invoke(&self, target: &Address, _frame: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Transport(format!("{} is not reachable from a standalone member", target)))
    }

    fn register_handler(&self, _handler: Weak<dyn RpcHandler>) {}

    fn add_view_listener(&self, _listener: Weak<dyn ViewListener>) {}
}

// ============================================================================
// In-process cluster
// ============================================================================

struct Slot {
    view: ClusterView,
    handler: Option<Weak<dyn RpcHandler>>,
    listeners: Vec<Weak<dyn ViewListener>>,
}

#[derive(Default)]
struct Members {
    slots: RwLock<BTreeMap<Address, Slot>>,
    next_view_id: AtomicU64,
}

/// Several members in one process
#[derive(Clone, Default)]
pub struct LocalCluster {
    members: Arc<Members>,
}

impl LocalCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for a new member named `name`
    ///
    /// The member starts alone in its own view; call [`install_view`] once
    /// every member is built.
    ///
    /// [`install_view`]: LocalCluster::install_view
    pub fn transport(&self, name: &str) -> Arc<InProcessTransport> {
        let address = Address::new(name);
        let view_id = self.members.next_view_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.members.slots.write().insert(
            address.clone(),
            Slot {
                view: ClusterView::new(view_id, [address.clone()]),
                handler: None,
                listeners: Vec::new(),
            },
        );
        Arc::new(InProcessTransport {
            address,
            members: Arc::clone(&self.members),
        })
    }

    /// Install a view made of `members` on every one of them
    pub fn install_view(&self, members: &[&str], is_merge: bool) -> ClusterView {
        self.install_view_on(members, members, is_merge)
    }

    /// Install a view made of `members` on the `receivers` only
    ///
    /// Members not in `receivers` keep their current view.
    pub fn install_view_on(&self, receivers: &[&str], members: &[&str], is_merge: bool) -> ClusterView {
        let view_id = self.members.next_view_id.fetch_add(1, Ordering::SeqCst) + 1;
        let view = ClusterView::new(view_id, members.iter().map(|m| Address::new(*m)));
        info!(view_id, members = ?members, is_merge, "installing view");

        let mut notifications = Vec::new();
        {
            let mut slots = self.members.slots.write();
            for name in receivers {
                let Some(slot) = slots.get_mut(&Address::new(*name)) else {
                    continue;
                };
                let old = std::mem::replace(&mut slot.view, view.clone());
                slot.listeners.retain(|l| l.strong_count() > 0);
                let event = ViewChangedEvent::new(old.members().clone(), view.clone(), is_merge);
                notifications.push((slot.listeners.clone(), event));
            }
        }
        for (listeners, event) in notifications {
            for listener in listeners.iter().filter_map(Weak::upgrade) {
                listener.view_changed(&event);
            }
        }
        view
    }

    /// Addresses of every member ever created
    pub fn addresses(&self) -> AddressCollection {
        self.members.slots.read().keys().cloned().collect()
    }
}

impl fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCluster")
            .field("members", &self.addresses())
            .finish()
    }
}

/// Transport of one member of a [`LocalCluster`]
pub struct InProcessTransport {
    address: Address,
    members: Arc<Members>,
}

impl Transport for InProcessTransport {
    fn local_address(&self) -> &Address {
        &self.address
    }

    fn view(&self) -> ClusterView {
        self.members
            .slots
            .read()
            .get(&self.address)
            .map(|s| s.view.clone())
            .unwrap_or_else(|| ClusterView::single(self.address.clone()))
    }

    fn invoke(&self, target: &Address, frame: &[u8]) -> Result<Vec<u8>> {
        let handler = {
            let slots = self.members.slots.read();
            let in_view = slots
                .get(&self.address)
                .map_or(false, |s| s.view.contains(target));
            if !in_view {
                return Err(Error::Transport(format!(
                    "{} is not in the view of {}",
                    target, self.address
                )));
            }
            slots
                .get(target)
                .and_then(|s| s.handler.as_ref())
                .and_then(Weak::upgrade)
        };
        let handler = handler
            .ok_or_else(|| Error::Transport(format!("{} has no running member", target)))?;
        debug!(from = %self.address, to = %target, id = frame.first().copied(), "sending frame");
        Ok(handler.handle_frame(&self.address, frame))
    }

    fn register_handler(&self, handler: Weak<dyn RpcHandler>) {
        if let Some(slot) = self.members.slots.write().get_mut(&self.address) {
            slot.handler = Some(handler);
        }
    }

    fn add_view_listener(&self, listener: Weak<dyn ViewListener>) {
        if let Some(slot) = self.members.slots.write().get_mut(&self.address) {
            slot.listeners.push(listener);
        }
    }
}

impl fmt::Debug for InProcessTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessTransport")
            .field("address", &self.address)
            .finish()
    }
}
