//! Deferred patching of the global database.
//!
//! The global database is replicated through the consensus engine and
//! cannot be touched while the engine is down, so address changes are
//! carried forward as plain SQL appended to a patch file that the global
//! database applies once when it next bootstraps.

use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use vessel_raft_config::MemberInfo;

use crate::error::{Error, Result};

/// Patch file name, relative to the node database directory.
pub const PATCH_GLOBAL_SQL: &str = "patch.global.sql";

/// Single-quoted SQL string literal, with embedded quotes doubled.
fn quote_sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Appends one address UPDATE per member to the patch file.
///
/// Statements are emitted for every member whether or not its address
/// changed; the file is append-only across invocations and the last
/// statement per id wins when replayed in order.
pub(crate) async fn append_global_patch(dir: &Path, members: &[MemberInfo]) -> Result<()> {
    let mut content = String::new();
    for member in members {
        content += &format!(
            "UPDATE nodes SET address = {} WHERE id = {};\n",
            quote_sql_string(&member.address),
            member.id
        );
    }

    if content.is_empty() {
        return Ok(());
    }

    let path = dir.join(PATCH_GLOBAL_SQL);
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)
        .await
        .map_err(Error::PatchFile)?;
    file.write_all(content.as_bytes())
        .await
        .map_err(Error::PatchFile)?;
    file.flush().await.map_err(Error::PatchFile)?;
    file.sync_all().await.map_err(Error::PatchFile)?;

    debug!(
        "appended {} statement(s) to {}",
        members.len(),
        path.display()
    );

    Ok(())
}
