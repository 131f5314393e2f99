//! Live membership removal through the cluster leader.
//!
//! Unlike the offline surgery in [`crate::recover`] and
//! [`crate::reconfigure`], removal goes through the running consensus
//! protocol: the leader commits the change before acknowledging it, so
//! this path is safe while the cluster is serving. It is the preferred way
//! to shrink membership whenever quorum still holds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tracing::{debug, info};
use vessel_node_db::{NodeDb, RaftRole};

use crate::error::{Error, Result};

/// Ceiling on the whole find-leader-and-remove sequence.
pub const FIND_LEADER_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum frame size accepted or sent on a leader connection (10MB).
const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Request frames understood by a member's membership endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Asks the member which address currently holds leadership.
    Leader,
    /// Asks the leader to remove the member with the given id.
    Remove {
        /// Id of the member to remove.
        id: u64,
    },
}

/// Response frames sent by a member's membership endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// The member's view of the current leader, if it knows one.
    Leader {
        /// Address of the leader, `None` while an election is running.
        address: Option<String>,
    },
    /// The removal was committed.
    Removed,
    /// The request failed on the remote side.
    Error {
        /// Remote failure description.
        message: String,
    },
}

/// An established connection to the cluster leader.
#[async_trait]
pub trait LeaderConnection: Send {
    /// Asks the leader to remove the member with the given id.
    async fn remove(&mut self, id: u64) -> Result<()>;

    /// Releases the connection.
    async fn close(self: Box<Self>);
}

/// Capability to locate the cluster leader and open a connection to it.
#[async_trait]
pub trait LeaderConnector: Send + Sync {
    /// Tries the given member addresses until one yields a connection to
    /// the current leader.
    async fn find_leader(&self, addresses: &[String]) -> Result<Box<dyn LeaderConnection>>;
}

/// Removes the voting member with the given address from the live cluster.
///
/// The address is resolved against the local store's voting set before any
/// network traffic happens. Leader discovery, connection and the removal
/// request together are bounded by [`FIND_LEADER_TIMEOUT`]; the connection
/// is released on every exit path.
///
/// This performs no offline state mutation, so it is safe for the operator
/// to simply retry on network failures.
///
/// # Errors
///
/// Fails with [`Error::UnknownAddress`] if no voting member has the given
/// address, [`Error::LeaderTimeout`] when discovery exceeds its ceiling,
/// and [`Error::LeaderConnect`]/[`Error::RemoveNode`] for connection and
/// protocol failures.
pub async fn remove_raft_node<C>(db: &NodeDb, connector: &C, address: &str) -> Result<()>
where
    C: LeaderConnector + ?Sized,
{
    let tx = db.begin().await.map_err(Error::ListDatabaseNodes)?;
    let nodes = tx.raft_nodes().await.map_err(Error::ListDatabaseNodes)?;
    drop(tx);

    let mut id = None;
    let mut addresses = Vec::new();
    for node in &nodes {
        if node.role != RaftRole::Voter {
            continue;
        }
        if node.address == address {
            id = Some(node.id);
        }
        addresses.push(node.address.clone());
    }

    let Some(id) = id else {
        return Err(Error::UnknownAddress(address.to_string()));
    };

    info!("removing raft node {} (id {})", address, id);

    timeout(FIND_LEADER_TIMEOUT, async {
        let mut connection = connector.find_leader(&addresses).await?;
        let result = connection.remove(id).await;
        connection.close().await;
        result
    })
    .await
    .map_err(|_| Error::LeaderTimeout)?
}

/// [`LeaderConnector`] over plain TCP with length-prefixed CBOR frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl LeaderConnector for TcpConnector {
    async fn find_leader(&self, addresses: &[String]) -> Result<Box<dyn LeaderConnection>> {
        for address in addresses {
            let mut stream = match TcpStream::connect(address).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("failed to dial {}: {}", address, e);
                    continue;
                }
            };

            if write_frame(&mut stream, &Request::Leader).await.is_err() {
                continue;
            }
            let response: Response = match read_frame(&mut stream).await {
                Ok(response) => response,
                Err(e) => {
                    debug!("failed to query {} for the leader: {}", address, e);
                    continue;
                }
            };

            match response {
                Response::Leader {
                    address: Some(leader),
                } if leader == *address => {
                    return Ok(Box::new(TcpLeaderConnection { stream }));
                }
                Response::Leader {
                    address: Some(leader),
                } => {
                    debug!("member {} reports leader at {}", address, leader);
                    match TcpStream::connect(&leader).await {
                        Ok(stream) => return Ok(Box::new(TcpLeaderConnection { stream })),
                        Err(e) => {
                            debug!("failed to dial leader {}: {}", leader, e);
                        }
                    }
                }
                Response::Leader { address: None } => {
                    debug!("member {} knows no leader", address);
                }
                _ => {
                    debug!("member {} sent an unexpected response", address);
                }
            }
        }

        Err(Error::LeaderConnect(
            "no reachable member reported a leader".to_string(),
        ))
    }
}

struct TcpLeaderConnection {
    stream: TcpStream,
}

#[async_trait]
impl LeaderConnection for TcpLeaderConnection {
    async fn remove(&mut self, id: u64) -> Result<()> {
        write_frame(&mut self.stream, &Request::Remove { id })
            .await
            .map_err(|e| Error::RemoveNode(e.to_string()))?;

        match read_frame(&mut self.stream)
            .await
            .map_err(|e| Error::RemoveNode(e.to_string()))?
        {
            Response::Removed => Ok(()),
            Response::Error { message } => Err(Error::RemoveNode(message)),
            Response::Leader { .. } => Err(Error::RemoveNode(
                "unexpected response to removal request".to_string(),
            )),
        }
    }

    async fn close(self: Box<Self>) {
        let mut stream = self.stream;
        let _ = stream.shutdown().await;
    }
}

async fn write_frame<T>(stream: &mut TcpStream, message: &T) -> std::io::Result<()>
where
    T: Serialize + Sync,
{
    let mut payload = Vec::new();
    ciborium::ser::into_writer(message, &mut payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"))?;
    stream.write_u32(len).await?;
    stream.write_all(&payload).await?;
    stream.flush().await
}

async fn read_frame<T>(stream: &mut TcpStream) -> std::io::Result<T>
where
    T: DeserializeOwned,
{
    let len = stream.read_u32().await?;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds maximum"),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;

    ciborium::de::from_reader(payload.as_slice())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}
