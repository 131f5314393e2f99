//! Offline membership surgery: recovery and reconfiguration.
//!
//! Both operations here rewrite the consensus engine's durable
//! configuration directly, outside the consensus protocol. They must only
//! run while the engine is fully stopped; running them against a live
//! engine corrupts its log. Neither operation is cancellable once the
//! durable rewrite has begun.

use std::collections::HashMap;

use tracing::info;
use vessel_node_db::{NodeDb, RaftNode, RaftRole};
use vessel_raft_config::{MemberInfo, MemberRole, MembershipRewriter};

use crate::error::{Error, Result};
use crate::patch::append_global_patch;
use crate::resolver::{CLUSTER_ADDRESS, local_raft_node};

const fn member_role(role: RaftRole) -> MemberRole {
    match role {
        RaftRole::Voter => MemberRole::Voter,
        RaftRole::StandBy => MemberRole::StandBy,
        RaftRole::Spare => MemberRole::Spare,
    }
}

fn member_info(node: &RaftNode) -> MemberInfo {
    MemberInfo {
        id: node.id,
        address: node.address.clone(),
        role: member_role(node.role),
    }
}

/// Collapses the consensus membership to this node alone.
///
/// Disaster recovery for when a majority of voters is permanently gone:
/// the durable configuration is rewritten to a single-voter group made of
/// this node, and the local membership table is replaced to match. All
/// other members are forgotten, not removed; they must re-join as new
/// members if wanted again.
///
/// The consensus engine must be fully stopped before calling this. Use
/// [`reconfigure`] instead if more than one member should survive, and
/// [`crate::remove_raft_node`] if the cluster still has quorum.
///
/// # Errors
///
/// Fails with [`Error::NoRaftRole`] if this node holds no consensus role
/// and [`Error::NotClustered`] if it is not networked; in both cases
/// nothing has been touched. Rewrite and store failures are stage-labeled
/// and not retried.
pub async fn recover<R>(db: &NodeDb, config: &R) -> Result<()>
where
    R: MembershipRewriter + ?Sized,
{
    let info = local_raft_node(db).await?;

    if info.address.is_empty() {
        return Err(Error::NotClustered);
    }

    info!(
        "recovering cluster with {} (id {}) as the only member",
        info.address, info.id
    );

    let members = vec![MemberInfo {
        id: info.id,
        address: info.address.clone(),
        role: MemberRole::Voter,
    }];
    config
        .rewrite_membership(&members)
        .await
        .map_err(Error::RecoverDatabaseState)?;

    let nodes = vec![RaftNode {
        id: info.id,
        address: info.address,
        role: RaftRole::Voter,
        name: info.name,
    }];
    let tx = db.begin().await.map_err(Error::UpdateDatabaseNodes)?;
    tx.replace_raft_nodes(&nodes)
        .await
        .map_err(Error::UpdateDatabaseNodes)?;
    tx.commit().await.map_err(Error::UpdateDatabaseNodes)?;

    Ok(())
}

/// Patches this node's own `cluster.address` configuration entry.
async fn update_local_address(db: &NodeDb, address: &str) -> Result<()> {
    let tx = db.begin().await.map_err(Error::UpdateNodeConfig)?;
    tx.config_patch(&HashMap::from([(
        CLUSTER_ADDRESS.to_string(),
        address.to_string(),
    )]))
    .await
    .map_err(Error::UpdateNodeConfig)?;
    tx.commit().await.map_err(Error::UpdateNodeConfig)?;

    Ok(())
}

/// Replaces the entire cluster membership.
///
/// `raft_nodes` is a full replacement list: addresses and roles may
/// change, member ids are read-only and must already exist. If the list
/// renames this node, its own address configuration is updated first, so
/// that a crash between that update and the durable rewrite leaves the
/// node discoverable under its old role mapping.
///
/// Address updates for the global database are appended to the
/// `patch.global.sql` file and applied when it next bootstraps.
///
/// The consensus engine must be fully stopped before calling this.
///
/// # Errors
///
/// Every failure is labeled with the stage that failed. There is no
/// rollback across stages: if the durable rewrite succeeded and a later
/// stage failed, the engine's configuration is ahead of the local store's
/// record of it and the operator must reconcile manually before retrying.
pub async fn reconfigure<R>(db: &NodeDb, config: &R, raft_nodes: Vec<RaftNode>) -> Result<()>
where
    R: MembershipRewriter + ?Sized,
{
    let info = local_raft_node(db).await?;

    let mut local_address = info.address.clone();
    let members: Vec<MemberInfo> = raft_nodes.iter().map(member_info).collect();
    for node in &raft_nodes {
        if node.id == info.id {
            local_address.clone_from(&node.address);
        }
    }

    info!(
        "reconfiguring cluster to {} member(s) from {}",
        raft_nodes.len(),
        info.address
    );

    // The node's own address must be durable before the engine
    // configuration moves.
    if local_address != info.address {
        update_local_address(db, &local_address).await?;
    }

    config
        .rewrite_membership(&members)
        .await
        .map_err(Error::RecoverDatabaseState)?;

    let tx = db.begin().await.map_err(Error::UpdateDatabaseNodes)?;
    tx.replace_raft_nodes(&raft_nodes)
        .await
        .map_err(Error::UpdateDatabaseNodes)?;
    tx.commit().await.map_err(Error::UpdateDatabaseNodes)?;

    append_global_patch(db.dir(), &members).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use vessel_raft_config::DurableConfig;

    use super::*;

    /// Records every rewrite it is asked to perform.
    #[derive(Default)]
    struct RecordingRewriter {
        calls: Mutex<Vec<Vec<MemberInfo>>>,
    }

    impl RecordingRewriter {
        fn calls(&self) -> Vec<Vec<MemberInfo>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MembershipRewriter for RecordingRewriter {
        async fn rewrite_membership(&self, members: &[MemberInfo]) -> vessel_raft_config::Result<()> {
            self.calls.lock().unwrap().push(members.to_vec());
            Ok(())
        }
    }

    /// Simulates a failed durable rewrite.
    struct FailingRewriter;

    #[async_trait]
    impl MembershipRewriter for FailingRewriter {
        async fn rewrite_membership(&self, _: &[MemberInfo]) -> vessel_raft_config::Result<()> {
            Err(vessel_raft_config::Error::Io(
                "error renaming staging file",
                std::io::Error::other("disk gone"),
            ))
        }
    }

    /// Reads the store's own address at rewrite time, to observe ordering.
    struct AddressObservingRewriter {
        db: NodeDb,
        seen: Mutex<Option<String>>,
    }

    #[async_trait]
    impl MembershipRewriter for AddressObservingRewriter {
        async fn rewrite_membership(&self, _: &[MemberInfo]) -> vessel_raft_config::Result<()> {
            let tx = self.db.begin().await.unwrap();
            let config = tx.config_load().await.unwrap();
            *self.seen.lock().unwrap() = config.get(CLUSTER_ADDRESS).map(ToString::to_string);
            Ok(())
        }
    }

    async fn open_db() -> (tempfile::TempDir, NodeDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = NodeDb::open(dir.path()).await.unwrap();
        (dir, db)
    }

    fn voter(id: u64, address: &str) -> RaftNode {
        RaftNode {
            id,
            address: address.to_string(),
            role: RaftRole::Voter,
            name: format!("member-{id}"),
        }
    }

    async fn seed_clustered(db: &NodeDb, nodes: &[RaftNode], own_address: &str) {
        let tx = db.begin().await.unwrap();
        tx.config_patch(&HashMap::from([(
            CLUSTER_ADDRESS.to_string(),
            own_address.to_string(),
        )]))
        .await
        .unwrap();
        tx.replace_raft_nodes(nodes).await.unwrap();
        tx.commit().await.unwrap();
    }

    async fn membership_table(db: &NodeDb) -> Vec<RaftNode> {
        let tx = db.begin().await.unwrap();
        tx.raft_nodes().await.unwrap()
    }

    #[tokio::test]
    async fn test_recover_collapses_to_single_member() {
        let (_dir, db) = open_db().await;
        seed_clustered(
            &db,
            &[voter(1, "10.0.0.1:8443"), voter(2, "10.0.0.2:8443")],
            "10.0.0.1:8443",
        )
        .await;

        let rewriter = RecordingRewriter::default();
        recover(&db, &rewriter).await.unwrap();

        assert_eq!(
            rewriter.calls(),
            vec![vec![MemberInfo {
                id: 1,
                address: "10.0.0.1:8443".to_string(),
                role: MemberRole::Voter,
            }]]
        );
        assert_eq!(
            membership_table(&db).await,
            vec![voter(1, "10.0.0.1:8443")]
        );
    }

    #[tokio::test]
    async fn test_recover_not_clustered_without_touching_accessor() {
        let (_dir, db) = open_db().await;

        let rewriter = RecordingRewriter::default();
        assert_matches!(recover(&db, &rewriter).await, Err(Error::NotClustered));
        assert!(rewriter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_recover_no_raft_role_without_touching_anything() {
        let (_dir, db) = open_db().await;
        // Membership exists but none of it is us, and we have no address.
        let tx = db.begin().await.unwrap();
        tx.replace_raft_nodes(&[voter(1, "10.0.0.1:8443")])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let rewriter = RecordingRewriter::default();
        assert_matches!(recover(&db, &rewriter).await, Err(Error::NoRaftRole));
        assert!(rewriter.calls().is_empty());
        assert_eq!(membership_table(&db).await, vec![voter(1, "10.0.0.1:8443")]);
    }

    #[tokio::test]
    async fn test_recover_rewrite_failure_leaves_store_untouched() {
        let (_dir, db) = open_db().await;
        let before = [voter(1, "10.0.0.1:8443"), voter(2, "10.0.0.2:8443")];
        seed_clustered(&db, &before, "10.0.0.1:8443").await;

        let err = recover(&db, &FailingRewriter).await.unwrap_err();
        assert_matches!(err, Error::RecoverDatabaseState(_));
        assert_eq!(membership_table(&db).await, before.to_vec());
    }

    /// Performs a real durable rewrite, then holds a transaction open on
    /// the shared connection so the following store update cannot begin.
    struct StoreBlockingRewriter {
        inner: DurableConfig,
        db: NodeDb,
        guard: Mutex<Option<vessel_node_db::NodeTx>>,
    }

    #[async_trait]
    impl MembershipRewriter for StoreBlockingRewriter {
        async fn rewrite_membership(&self, members: &[MemberInfo]) -> vessel_raft_config::Result<()> {
            self.inner.rewrite_membership(members).await?;
            let tx = self.db.begin().await.unwrap();
            *self.guard.lock().unwrap() = Some(tx);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failure_after_rewrite_leaves_engine_ahead() {
        let dir = tempfile::tempdir().unwrap();
        let db = NodeDb::open(dir.path()).await.unwrap();
        seed_clustered(&db, &[voter(1, "10.0.0.1:8443")], "10.0.0.1:8443").await;

        let rewriter = StoreBlockingRewriter {
            inner: DurableConfig::new(dir.path().join("global")),
            db: db.clone(),
            guard: Mutex::new(None),
        };
        let err = reconfigure(
            &db,
            &rewriter,
            vec![voter(1, "10.0.0.1:8443"), voter(2, "10.0.0.2:8443")],
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::UpdateDatabaseNodes(_));

        // The engine's durable configuration is already ahead of the
        // local store: there is no rollback across the two, the operator
        // must reconcile before retrying.
        let members = rewriter.inner.read_membership().await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].id, 2);

        drop(rewriter);
        assert_eq!(membership_table(&db).await, vec![voter(1, "10.0.0.1:8443")]);
    }

    #[tokio::test]
    async fn test_reconfigure_updates_own_address_before_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let db = NodeDb::open(dir.path()).await.unwrap();
        seed_clustered(&db, &[voter(1, "10.0.0.1:8443")], "10.0.0.1:8443").await;

        let rewriter = AddressObservingRewriter {
            db: db.clone(),
            seen: Mutex::new(None),
        };
        reconfigure(
            &db,
            &rewriter,
            vec![voter(1, "10.0.0.2:8443"), voter(2, "10.0.0.3:8443")],
        )
        .await
        .unwrap();

        // The config entry was already updated when the rewrite ran.
        assert_eq!(
            rewriter.seen.lock().unwrap().clone(),
            Some("10.0.0.2:8443".to_string())
        );
    }

    #[tokio::test]
    async fn test_reconfigure_is_idempotent_for_membership_table() {
        let (_dir, db) = open_db().await;
        seed_clustered(&db, &[voter(1, "10.0.0.1:8443")], "10.0.0.1:8443").await;

        let target = vec![voter(1, "10.0.0.1:8443"), voter(2, "10.0.0.2:8443")];
        let rewriter = RecordingRewriter::default();
        reconfigure(&db, &rewriter, target.clone()).await.unwrap();
        reconfigure(&db, &rewriter, target.clone()).await.unwrap();

        assert_eq!(membership_table(&db).await, target);
        assert_eq!(rewriter.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_reconfigure_preserves_ids() {
        let (_dir, db) = open_db().await;
        seed_clustered(
            &db,
            &[voter(1, "10.0.0.1:8443"), voter(2, "10.0.0.2:8443")],
            "10.0.0.1:8443",
        )
        .await;

        let rewriter = RecordingRewriter::default();
        reconfigure(
            &db,
            &rewriter,
            vec![voter(1, "10.0.1.1:8443"), voter(2, "10.0.1.2:8443")],
        )
        .await
        .unwrap();

        let ids: Vec<u64> = membership_table(&db).await.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_reconfigure_appends_patch_statements_per_call() {
        let (dir, db) = open_db().await;
        seed_clustered(&db, &[voter(1, "10.0.0.1:8443")], "10.0.0.1:8443").await;

        let rewriter = RecordingRewriter::default();
        reconfigure(&db, &rewriter, vec![voter(1, "10.0.0.2:8443")])
            .await
            .unwrap();
        reconfigure(&db, &rewriter, vec![voter(1, "10.0.0.3:8443")])
            .await
            .unwrap();

        let content =
            std::fs::read_to_string(dir.path().join(crate::patch::PATCH_GLOBAL_SQL)).unwrap();
        assert_eq!(
            content,
            "UPDATE nodes SET address = '10.0.0.2:8443' WHERE id = 1;\n\
             UPDATE nodes SET address = '10.0.0.3:8443' WHERE id = 1;\n"
        );
    }
}
