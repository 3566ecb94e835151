//! Error types for tally-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using tally-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tally-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry or pending operation not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The reachability probe reported offline for an action that needs the remote store
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// Remote gateway error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Invalid sync settings
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the remote store could not be reached.
    pub const fn is_network(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable | Self::Remote(RemoteError::Unavailable(_))
        )
    }
}
