//! Storage error types.

use thiserror::Error;

/// Errors from a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend I/O failure (disk, database, poisoned lock)
    #[error("storage I/O error: {0}")]
    Io(String),

    /// A record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A record the operation depends on does not exist
    #[error("{what} not found: {key}")]
    NotFound {
        /// Record kind
        what: &'static str,
        /// Key that was looked up
        key: String,
    },
}

impl StorageError {
    /// Returns true if retrying the transaction may succeed.
    ///
    /// I/O failures are transient; a record that does not decode will not
    /// decode next time either.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
