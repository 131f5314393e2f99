//! Direct access to the consensus engine's durable membership
//! configuration.
//!
//! The consensus engine persists its own view of the cluster membership
//! inside its data directory, independently of any database the daemon
//! keeps. During disaster recovery that configuration has to be rewritten
//! from the outside, while the engine is stopped, with no protocol check
//! guarding the change. This crate owns that one dangerous primitive and
//! nothing else.
//!
//! The rewrite is exposed as the [`MembershipRewriter`] capability so
//! orchestration code can be tested against in-memory fakes, including
//! fault-injecting ones.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

use std::path::{Path, PathBuf};

pub use error::{Error, Result};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{self, AsyncWriteExt};
use tracing::info;

/// File holding the durable membership configuration, inside the engine's
/// data directory.
pub const MEMBERSHIP_FILE: &str = "membership";

/// Staging file used to make rewrites atomic.
const MEMBERSHIP_TMP_FILE: &str = "membership.new";

/// Consensus role of a configured member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    /// Votes in elections and acknowledges commits.
    Voter,
    /// Replicates without voting.
    StandBy,
    /// Holds no data.
    Spare,
}

/// One entry of the durable membership configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Immutable member identifier.
    pub id: u64,
    /// Network address of the member.
    pub address: String,
    /// Consensus role of the member.
    pub role: MemberRole,
}

/// Capability to replace the consensus engine's durable membership
/// configuration.
///
/// Implementations must guarantee that, as observed by a subsequent engine
/// startup, either the previous configuration or the new one is intact,
/// never a torn mix. Callers are responsible for ensuring the engine is
/// stopped for the duration of the call.
#[async_trait]
pub trait MembershipRewriter: Send + Sync {
    /// Replaces the stored configuration with `members`, fully.
    async fn rewrite_membership(&self, members: &[MemberInfo]) -> Result<()>;
}

/// File-backed durable configuration in the consensus engine's data
/// directory.
#[derive(Clone, Debug)]
pub struct DurableConfig {
    dir: PathBuf,
}

impl DurableConfig {
    /// Creates an accessor for the engine data directory `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The engine data directory this accessor operates on.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads the currently stored membership configuration.
    ///
    /// A missing file reads as an empty configuration: the engine has
    /// never been bootstrapped in this directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub async fn read_membership(&self) -> Result<Vec<MemberInfo>> {
        let path = self.dir.join(MEMBERSHIP_FILE);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io("error reading membership file", e)),
        };

        ciborium::de::from_reader(data.as_slice()).map_err(|e| Error::Decoding(e.to_string()))
    }
}

#[async_trait]
impl MembershipRewriter for DurableConfig {
    /// Rewrites the membership file with write-then-rename atomicity.
    ///
    /// The new configuration is staged in a sibling file, flushed to disk,
    /// and renamed over the current one. A stale staging file left behind
    /// by an interrupted rewrite is simply overwritten.
    async fn rewrite_membership(&self, members: &[MemberInfo]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Io("error creating engine data directory", e))?;

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&members, &mut encoded)
            .map_err(|e| Error::Encoding(e.to_string()))?;

        let tmp_path = self.dir.join(MEMBERSHIP_TMP_FILE);
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::Io("error creating staging file", e))?;
        file.write_all(&encoded)
            .await
            .map_err(|e| Error::Io("error writing staging file", e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::Io("error syncing staging file", e))?;
        drop(file);

        let path = self.dir.join(MEMBERSHIP_FILE);
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Error::Io("error renaming staging file", e))?;

        info!(
            "replaced durable membership in {} with {} member(s)",
            self.dir.display(),
            members.len()
        );

        Ok(())
    }
}
