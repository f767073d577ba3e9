//! Error types for repository sessions.

use crate::session::SessionState;
use thiserror::Error;

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors reported by repository sessions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    /// The operation is not permitted in the session's current state.
    #[error("cannot {operation} in session state {state:?}")]
    InvalidSessionState {
        /// The state the session was in.
        state: SessionState,
        /// The rejected operation.
        operation: &'static str,
    },

    /// Local storage rejected a write because of an integrity constraint.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Local storage is locked or could not be opened.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The record could not be processed.
    #[error("invalid record {guid}: {reason}")]
    InvalidRecord {
        /// Identifier of the offending record.
        guid: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The completion receiver was dropped before a result was delivered.
    #[error("session dropped the completion without a result")]
    NoResult,
}

impl RepositoryError {
    /// Creates an invalid-state error.
    pub fn invalid_state(state: SessionState, operation: &'static str) -> Self {
        Self::InvalidSessionState { state, operation }
    }

    /// Returns true if this error signals a lifecycle misuse rather than a
    /// storage failure.
    pub fn is_state_violation(&self) -> bool {
        matches!(self, Self::InvalidSessionState { .. })
    }
}
