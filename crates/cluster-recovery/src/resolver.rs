//! Resolution of this node's place in the cluster topology.
//!
//! The membership table lists every member the node last knew about; the
//! row describing the node itself is the one whose address matches the
//! store's own `cluster.address` configuration entry.

use vessel_node_db::{NodeDb, NodeTx, RaftNode, RaftRole};

use crate::error::{Error, Result};

/// Configuration key holding this node's own cluster address.
pub const CLUSTER_ADDRESS: &str = "cluster.address";

/// Finds the membership row describing this node, if any.
///
/// A node with no cluster address and an empty membership table is
/// standalone: it is reported as member 1 with an empty address, which the
/// orchestrators reject with [`Error::NotClustered`] where networking is
/// required. `None` means the node holds no consensus role.
async fn determine_raft_node(tx: &NodeTx) -> vessel_node_db::Result<Option<RaftNode>> {
    let config = tx.config_load().await?;
    let address = config.get(CLUSTER_ADDRESS).unwrap_or_default().to_string();
    let nodes = tx.raft_nodes().await?;

    if address.is_empty() {
        if nodes.is_empty() {
            return Ok(Some(RaftNode {
                id: 1,
                address: String::new(),
                role: RaftRole::Voter,
                name: String::new(),
            }));
        }

        return Ok(None);
    }

    Ok(nodes.into_iter().find(|node| node.address == address))
}

/// Returns the membership row corresponding to this node.
///
/// # Errors
///
/// Fails with [`Error::NoRaftRole`] if the node holds no consensus role;
/// callers must treat that as non-retryable, it reflects topology rather
/// than a transient fault.
pub async fn local_raft_node(db: &NodeDb) -> Result<RaftNode> {
    let tx = db.begin().await.map_err(Error::DetermineRaftRole)?;
    let info = determine_raft_node(&tx)
        .await
        .map_err(Error::DetermineRaftRole)?;

    info.ok_or(Error::NoRaftRole)
}

/// Returns the addresses of all voting members, in store order.
///
/// Order carries no meaning; it is only used to seed connection attempts.
///
/// # Errors
///
/// Returns an error if the membership table cannot be read.
pub async fn list_database_addresses(db: &NodeDb) -> Result<Vec<String>> {
    let tx = db.begin().await.map_err(Error::ListDatabaseNodes)?;
    let nodes = tx.raft_nodes().await.map_err(Error::ListDatabaseNodes)?;

    Ok(nodes
        .into_iter()
        .filter(|node| node.role == RaftRole::Voter)
        .map(|node| node.address)
        .collect())
}
