//! Local node store for the vessel daemon.
//!
//! Every machine keeps a small single-writer database recording its own
//! configuration and the membership of the consensus group as it last knew
//! it. This database is local state: it is never replicated and can be
//! read or rewritten while the consensus engine is offline, which is what
//! the cluster recovery tooling relies on.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use error::{Error, Result};
pub use types::{NodeConfig, RaftNode, RaftRole};

use libsql::{Builder, Connection, Transaction, Value};
use tracing::debug;

static SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

/// Name of the database file inside the node database directory.
pub const LOCAL_DB_FILE: &str = "local.db";

/// Handle to the local node database.
#[derive(Clone)]
pub struct NodeDb {
    connection: Connection,
    dir: PathBuf,
}

impl std::fmt::Debug for NodeDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDb").field("dir", &self.dir).finish()
    }
}

impl NodeDb {
    /// Opens (creating if necessary) the node database under `dir`.
    ///
    /// Schema bootstrap is idempotent, so reopening an existing database
    /// is safe.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened or migrated.
    pub async fn open(dir: impl Into<PathBuf> + Send) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Io("error creating database directory", e))?;

        let connection = Builder::new_local(dir.join(LOCAL_DB_FILE))
            .build()
            .await?
            .connect()?;
        connection.execute_batch(SCHEMA_SQL).await?;

        debug!("opened node database in {}", dir.display());

        Ok(Self { connection, dir })
    }

    /// Directory holding the database and its sibling artifacts.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Begins a write transaction.
    ///
    /// The transaction rolls back unless [`NodeTx::commit`] is called.
    /// Keep transactions short; in particular, never hold one open across
    /// a consensus configuration rewrite.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    pub async fn begin(&self) -> Result<NodeTx> {
        let tx = self.connection.transaction().await?;
        Ok(NodeTx { tx })
    }
}

/// An open transaction against the local node database.
pub struct NodeTx {
    tx: Transaction,
}

impl NodeTx {
    /// Returns all rows of the membership table, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is malformed.
    pub async fn raft_nodes(&self) -> Result<Vec<RaftNode>> {
        let mut rows = self
            .tx
            .query(
                "SELECT id, address, role, name FROM raft_nodes ORDER BY id",
                Vec::<Value>::new(),
            )
            .await?;

        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            let id = match row.get_value(0)? {
                Value::Integer(id) => {
                    u64::try_from(id).map_err(|_| Error::UnexpectedValue { column: "id" })?
                }
                _ => return Err(Error::UnexpectedValue { column: "id" }),
            };
            let address = match row.get_value(1)? {
                Value::Text(address) => address,
                _ => return Err(Error::UnexpectedValue { column: "address" }),
            };
            let role = match row.get_value(2)? {
                Value::Integer(code) => RaftRole::try_from(code)?,
                _ => return Err(Error::UnexpectedValue { column: "role" }),
            };
            let name = match row.get_value(3)? {
                Value::Text(name) => name,
                _ => return Err(Error::UnexpectedValue { column: "name" }),
            };

            nodes.push(RaftNode {
                id,
                address,
                role,
                name,
            });
        }

        Ok(nodes)
    }

    /// Returns the address of the member with the given id, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is malformed.
    pub async fn raft_node_address(&self, id: u64) -> Result<Option<String>> {
        let id = i64::try_from(id).map_err(|_| Error::UnexpectedValue { column: "id" })?;
        let mut rows = self
            .tx
            .query(
                "SELECT address FROM raft_nodes WHERE id = ?1",
                vec![Value::Integer(id)],
            )
            .await?;

        match rows.next().await? {
            Some(row) => match row.get_value(0)? {
                Value::Text(address) => Ok(Some(address)),
                _ => Err(Error::UnexpectedValue { column: "address" }),
            },
            None => Ok(None),
        }
    }

    /// Replaces the membership table with `nodes`, verbatim.
    ///
    /// This is a full replacement, not a merge: rows absent from `nodes`
    /// are forgotten.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub async fn replace_raft_nodes(&self, nodes: &[RaftNode]) -> Result<()> {
        self.tx
            .execute("DELETE FROM raft_nodes", Vec::<Value>::new())
            .await?;

        for node in nodes {
            let id =
                i64::try_from(node.id).map_err(|_| Error::UnexpectedValue { column: "id" })?;
            self.tx
                .execute(
                    "INSERT INTO raft_nodes (id, address, role, name) VALUES (?1, ?2, ?3, ?4)",
                    vec![
                        Value::Integer(id),
                        Value::Text(node.address.clone()),
                        Value::Integer(node.role.code()),
                        Value::Text(node.name.clone()),
                    ],
                )
                .await?;
        }

        Ok(())
    }

    /// Loads the full node configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is malformed.
    pub async fn config_load(&self) -> Result<NodeConfig> {
        let mut rows = self
            .tx
            .query("SELECT key, value FROM config", Vec::<Value>::new())
            .await?;

        let mut values = HashMap::new();
        while let Some(row) = rows.next().await? {
            let key = match row.get_value(0)? {
                Value::Text(key) => key,
                _ => return Err(Error::UnexpectedValue { column: "key" }),
            };
            let value = match row.get_value(1)? {
                Value::Text(value) => value,
                _ => return Err(Error::UnexpectedValue { column: "value" }),
            };
            values.insert(key, value);
        }

        Ok(NodeConfig::from_values(values))
    }

    /// Upserts each key/value pair into the node configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub async fn config_patch(&self, values: &HashMap<String, String>) -> Result<()> {
        for (key, value) in values {
            self.tx
                .execute(
                    "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
                    vec![Value::Text(key.clone()), Value::Text(value.clone())],
                )
                .await?;
        }

        Ok(())
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; the transaction is rolled
    /// back in that case.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
