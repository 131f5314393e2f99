//! Cluster membership recovery and reconfiguration for the vessel daemon.
//!
//! When the recorded cluster membership and the consensus engine's own
//! durable configuration diverge, typically after losing a majority of
//! voters for good, the consensus protocol can no longer be used to fix
//! itself. The operations here repair the membership from the outside:
//!
//! - [`recover`] collapses the group to the local node alone, for disaster
//!   recovery when quorum is permanently lost.
//! - [`reconfigure`] replaces the whole membership list (addresses and
//!   roles, never ids) for planned topology changes.
//! - [`remove_raft_node`] removes one member through the live protocol,
//!   and is the preferred path whenever the cluster still has quorum.
//!
//! [`recover`] and [`reconfigure`] require the consensus engine to be
//! fully stopped and reconcile three sources of truth: the local node
//! store, the engine's durable configuration, and (deferred, via a patch
//! file) the replicated global database. They provide no rollback across
//! those stores; every failure is stage-labeled so an operator can
//! reconcile by hand.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod patch;
mod recovery;
mod remote;
mod resolver;

pub use error::{Error, Result};
pub use patch::PATCH_GLOBAL_SQL;
pub use recovery::{reconfigure, recover};
pub use remote::{
    FIND_LEADER_TIMEOUT, LeaderConnection, LeaderConnector, Request, Response, TcpConnector,
    remove_raft_node,
};
pub use resolver::{CLUSTER_ADDRESS, list_database_addresses, local_raft_node};
