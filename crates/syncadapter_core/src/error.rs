//! Error types for the sync controller.

use std::io;
use syncadapter_repository::RepositoryError;
use thiserror::Error;

/// Result type for controller operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync run.
///
/// Every variant maps to exactly one [`ErrorClass`], which decides the
/// statistics counter it is folded into.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local storage rejected a write because of an integrity constraint.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Local storage is locked or could not be opened.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The host canceled the operation.
    #[error("operation canceled")]
    OperationCanceled,

    /// Credentials could not be resolved or were rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// Network or transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration or persisted-state location.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A stage name that no stage answers to.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// The session engine reported a failure.
    #[error("session engine error: {0}")]
    Engine(String),

    /// The worker thread panicked.
    #[error("sync worker panicked: {0}")]
    WorkerPanicked(String),

    /// Anything else.
    #[error("{0}")]
    Unclassified(String),
}

/// Statistics bucket an error is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Counted as a parse error.
    Parse,
    /// Counted as an I/O error.
    Io,
    /// Counted as an authentication error.
    Auth,
    /// Not counted.
    Uncounted,
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthenticationFailure(message.into())
    }

    /// Creates a session engine error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Returns the statistics bucket for this error.
    ///
    /// Unrecognised failures count as I/O errors.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::ConstraintViolation(_) => ErrorClass::Parse,
            SyncError::OperationCanceled => ErrorClass::Uncounted,
            SyncError::AuthenticationFailure(_) => ErrorClass::Auth,
            SyncError::StorageUnavailable(_)
            | SyncError::Transport(_)
            | SyncError::Io(_)
            | SyncError::Serialization(_)
            | SyncError::Config(_)
            | SyncError::UnknownStage(_)
            | SyncError::Engine(_)
            | SyncError::WorkerPanicked(_)
            | SyncError::Unclassified(_) => ErrorClass::Io,
        }
    }

    /// Returns true for failures the classifier has no specific bucket for.
    pub fn is_unclassified(&self) -> bool {
        matches!(
            self,
            SyncError::Engine(_) | SyncError::WorkerPanicked(_) | SyncError::Unclassified(_)
        )
    }
}

impl From<RepositoryError> for SyncError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::ConstraintViolation(message) => Self::ConstraintViolation(message),
            RepositoryError::Unavailable(message) => Self::StorageUnavailable(message),
            other => Self::Unclassified(other.to_string()),
        }
    }
}
