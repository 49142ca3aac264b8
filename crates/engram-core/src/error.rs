//! Engine error taxonomy
//!
//! Every error crossing the engine boundary is typed and carries a
//! user-facing message. Adapters map these onto transport status codes
//! (paused -> 503, blocked -> 507, not-found -> 404, validation -> 400).

use crate::storage::StorageError;

/// Errors surfaced by the engine's public operations
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No memory with the given id
    #[error("Memory not found: {0}")]
    NotFound(i64),

    /// No session with the given id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A bulk delete matched several memories and `confirm` was not set
    #[error("Refusing to delete {count} memories without confirmation")]
    BulkDeleteSafety {
        /// Number of memories that would be deleted
        count: usize,
    },

    /// Writes are administratively paused
    #[error("Memory writes are paused; resume the service to continue")]
    Paused,

    /// The database reached its hard size cap
    #[error("Database size limit exceeded: {0}")]
    StorageBlocked(String),

    /// The search query could not be turned into a valid FTS expression
    #[error("Invalid search query: {0}")]
    InvalidQuery(String),

    /// An import bundle was refused (duplicate titles or schema mismatch)
    #[error("Import rejected: {0}")]
    ImportRejected(String),

    /// Underlying storage failure
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Blocked(msg) => EngineError::StorageBlocked(msg),
            StorageError::NotFound(id) => EngineError::NotFound(id),
            StorageError::InvalidQuery(msg) => EngineError::InvalidQuery(msg),
            other => EngineError::Storage(other),
        }
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;
