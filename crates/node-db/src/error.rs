//! Error types for the local node store

use thiserror::Error;

/// Errors raised by the local node store.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    /// Filesystem failure while preparing the database directory.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// A row contained a value of an unexpected type.
    #[error("unexpected value in column '{column}'")]
    UnexpectedValue {
        /// The column holding the offending value
        column: &'static str,
    },

    /// A raft role integer outside the known encoding.
    #[error("unknown raft role code {0}")]
    UnknownRole(i64),
}

/// Result type for local node store operations.
pub type Result<T> = std::result::Result<T, Error>;
