//! State store error types

use thinshare_common::Error;
use thiserror::Error;

/// Error type for state store operations
#[derive(Debug, Error)]
pub enum StateError {
    /// The record was written by someone else since it was read
    #[error("version conflict on {key}: expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("gave up updating {key} after {attempts} conflicting attempts")]
    RetriesExhausted { key: String, attempts: u32 },

    /// The caller's mutator refused the update
    #[error(transparent)]
    Rejected(Error),

    #[error("watch canceled")]
    Canceled,

    #[error("watch deadline exceeded")]
    DeadlineExceeded,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for StateError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

pub type StateResult<T> = Result<T, StateError>;

impl From<StateError> for Error {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Rejected(inner) => inner,
            StateError::Canceled => Self::Canceled,
            StateError::DeadlineExceeded => Self::DeadlineExceeded,
            StateError::Json(e) => Self::Serialization(e.to_string()),
            other => Self::internal(format!("state store: {other}")),
        }
    }
}
