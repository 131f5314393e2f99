//! Error types for the durable configuration accessor

use thiserror::Error;

/// Errors raised while reading or rewriting the durable configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem failure, with a short description of the step.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// Failed to encode the membership list.
    #[error("failed to encode membership: {0}")]
    Encoding(String),

    /// Failed to decode the stored membership list.
    #[error("failed to decode membership: {0}")]
    Decoding(String),
}

/// Result type for durable configuration operations.
pub type Result<T> = std::result::Result<T, Error>;
