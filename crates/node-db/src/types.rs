//! Types persisted in the local node store

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Role a cluster member plays in the consensus group.
///
/// The integer encoding is part of the on-disk schema and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftRole {
    /// Participates in leader election and commit acknowledgment.
    Voter,
    /// Replicates the log but does not vote.
    StandBy,
    /// Holds no data, available for promotion.
    Spare,
}

impl RaftRole {
    /// The on-disk integer code for this role.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Voter => 0,
            Self::StandBy => 1,
            Self::Spare => 2,
        }
    }
}

impl TryFrom<i64> for RaftRole {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self, Error> {
        match code {
            0 => Ok(Self::Voter),
            1 => Ok(Self::StandBy),
            2 => Ok(Self::Spare),
            other => Err(Error::UnknownRole(other)),
        }
    }
}

impl fmt::Display for RaftRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voter => write!(f, "voter"),
            Self::StandBy => write!(f, "stand-by"),
            Self::Spare => write!(f, "spare"),
        }
    }
}

/// One row of the `raft_nodes` membership table.
///
/// Identifiers are assigned once when a member joins and are never
/// renumbered afterwards. An empty address marks a standalone node that is
/// not exposed to the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftNode {
    /// Immutable member identifier.
    pub id: u64,
    /// Network address (`host:port`), or empty for standalone nodes.
    pub address: String,
    /// Consensus role of the member.
    pub role: RaftRole,
    /// Human-readable member name.
    pub name: String,
}

/// Key/value configuration of this node, as read from the `config` table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeConfig {
    values: HashMap<String, String>,
}

impl NodeConfig {
    pub(crate) fn from_values(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Returns the value for `key`, if set.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Number of configuration entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no configuration entries are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
