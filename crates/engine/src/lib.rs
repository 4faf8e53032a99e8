//! Transactional pipeline of a gridkv member
//!
//! Every operation becomes a [`Command`] that runs through an
//! [`InterceptorChain`] of stages, each handling one concern:
//!
//! - [`interceptors`]: partition handling, transactions, locking,
//!   distribution, versioning, the store and the final call
//! - [`remote`]: commands arriving from other members
//! - [`node`]: one member wired from a [`GridConfig`] and its collaborators
//!
//! Members talk through a [`Transport`]; [`LocalCluster`] embeds several in
//! one process.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ambient;
pub mod command;
pub mod config;
pub mod interceptor;
pub mod interceptors;
pub mod node;
pub mod notify;
pub mod recovery;
pub mod remote;
pub mod rpc;
pub mod transport;

pub use ambient::{AmbientHandle, AmbientTransactionManager, SuspendGuard};
pub use command::{
    decode_command, decode_response, encode_command, encode_response, Command,
    LockControlCommand, PrepareCommand, Response,
};
pub use config::{
    ClusteringConfig, GridConfig, LockingConfig, PartitionHandlingConfig, TransactionConfig,
    VersioningConfig,
};
pub use interceptor::{Interceptor, InterceptorChain, Next};
pub use interceptors::{PartitionState, StoreStats};
pub use node::{CacheNode, Collaborators, NodeStats};
pub use notify::{NoopNotifier, Notifier};
pub use recovery::{NoRecovery, PreparedTransactionLog, RecoveryManager};
pub use remote::RemoteCommandHandler;
pub use rpc::RpcDispatcher;
pub use transport::{
    InProcessTransport, LocalCluster, RpcHandler, StandaloneTransport, Transport, ViewListener,
};
