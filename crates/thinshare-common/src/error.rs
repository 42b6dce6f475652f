//! Error types for thinshare
//!
//! This module defines the error taxonomy shared by the state store, the
//! migration engine and the CSI-facing handlers.

use thiserror::Error;

/// Common result type for thinshare operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for thinshare
#[derive(Debug, Error)]
pub enum Error {
    // Request errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The record changed underneath an operation; replay against the new state.
    #[error("aborted: {0}")]
    Aborted(String),

    // Execution errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("command `{command}` failed on node {node}: {message}")]
    Command {
        node: String,
        command: String,
        message: String,
    },

    // Caller-initiated termination
    #[error("operation canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    // Setup errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an aborted error
    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::Aborted(msg.into())
    }

    /// Create a command failure for `command` run on `node`
    pub fn command(
        node: impl Into<String>,
        command: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Command {
            node: node.into(),
            command: command.into(),
            message: message.into(),
        }
    }

    /// Check if the whole operation may be replayed by the caller.
    ///
    /// Every physical step is idempotent, so anything that is not a
    /// malformed request or an explicit cancellation is safe to retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Internal(_) | Self::Command { .. } | Self::Aborted(_) | Self::DeadlineExceeded
        )
    }

    /// Check if the caller gave up waiting
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// Get the gRPC status code for CSI responses
    #[must_use]
    pub const fn grpc_code(&self) -> tonic::Code {
        match self {
            Self::InvalidArgument(_) => tonic::Code::InvalidArgument,
            Self::NotFound(_) => tonic::Code::NotFound,
            Self::Aborted(_) => tonic::Code::Aborted,
            Self::Canceled => tonic::Code::Cancelled,
            Self::DeadlineExceeded => tonic::Code::DeadlineExceeded,
            Self::Internal(_)
            | Self::Command { .. }
            | Self::Configuration(_)
            | Self::Serialization(_) => tonic::Code::Internal,
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        Self::new(err.grpc_code(), err.to_string())
    }
}
