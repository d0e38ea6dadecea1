//! Error types for the SQLite store.

use thiserror::Error;

/// Errors that can occur in the SQLite store.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem error while preparing the database location.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be turned back into a session.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The blocking worker running a query panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(String),

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,
}

/// Result type alias for SQLite store operations.
pub type Result<T> = std::result::Result<T, SqliteStoreError>;

impl From<SqliteStoreError> for latchkey::Error {
    fn from(err: SqliteStoreError) -> Self {
        match err {
            SqliteStoreError::Closed => latchkey::Error::Closed,
            other => latchkey::Error::store(other),
        }
    }
}
