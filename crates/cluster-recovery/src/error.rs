//! Error types for cluster membership recovery

use thiserror::Error;

/// Errors raised by the recovery, reconfiguration and remote removal
/// operations.
///
/// Precondition variants (`NoRaftRole`, `NotClustered`, `UnknownAddress`)
/// reflect cluster topology and are never worth retrying. Every other
/// variant names the stage that failed so an operator can tell how far an
/// interrupted operation got.
#[derive(Debug, Error)]
pub enum Error {
    /// This cluster member holds no consensus role at all.
    #[error("this cluster member has no raft role")]
    NoRaftRole,

    /// The node is standalone and not exposed to the network.
    #[error("this node is not clustered")]
    NotClustered,

    /// No voting member matches the given address.
    #[error("no raft node with address {0:?}")]
    UnknownAddress(String),

    /// Reading the local identity from the node store failed.
    #[error("failed to determine cluster member raft role: {0}")]
    DetermineRaftRole(#[source] vessel_node_db::Error),

    /// Listing the membership table failed.
    #[error("failed to list database nodes: {0}")]
    ListDatabaseNodes(#[source] vessel_node_db::Error),

    /// Patching this node's own address configuration failed.
    #[error("failed to update node configuration: {0}")]
    UpdateNodeConfig(#[source] vessel_node_db::Error),

    /// Rewriting the consensus engine's durable configuration failed.
    #[error("failed to recover database state: {0}")]
    RecoverDatabaseState(#[source] vessel_raft_config::Error),

    /// Replacing the local membership table failed.
    #[error("failed to update database nodes: {0}")]
    UpdateDatabaseNodes(#[source] vessel_node_db::Error),

    /// Appending to the global database patch file failed.
    #[error("failed to write global database patch: {0}")]
    PatchFile(#[source] std::io::Error),

    /// No reachable member produced a usable leader connection.
    #[error("failed to connect to cluster leader: {0}")]
    LeaderConnect(String),

    /// Leader discovery exceeded its time ceiling.
    #[error("timed out connecting to cluster leader")]
    LeaderTimeout,

    /// The leader rejected or failed the removal request.
    #[error("failed to remove node: {0}")]
    RemoveNode(String),
}

/// Result type for cluster recovery operations.
pub type Result<T> = std::result::Result<T, Error>;
