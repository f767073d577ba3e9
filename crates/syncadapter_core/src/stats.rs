//! Per-run error statistics.
//!
//! Counters are incremented by the worker thread and read by the
//! controller once the completion channel has delivered the terminal
//! result, which orders the writes before the read.

use crate::error::{ErrorClass, SyncError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Error counters for one run.
#[derive(Debug, Default)]
pub struct RunCounters {
    parse_errors: AtomicU64,
    io_errors: AtomicU64,
    auth_errors: AtomicU64,
}

impl RunCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `error` into the counter for its class and returns the class.
    pub fn record(&self, error: &SyncError) -> ErrorClass {
        let class = error.class();
        match class {
            ErrorClass::Parse => self.record_parse_error(),
            ErrorClass::Io => self.record_io_error(),
            ErrorClass::Auth => self.record_auth_error(),
            ErrorClass::Uncounted => {}
        }
        class
    }

    /// Records a parse error.
    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an I/O error.
    pub fn record_io_error(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an authentication error.
    pub fn record_auth_error(&self) {
        self.auth_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> SyncStats {
        SyncStats {
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            auth_errors: self.auth_errors.load(Ordering::Relaxed),
        }
    }
}

/// Error statistics reported to the host with each run result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Local storage integrity failures.
    pub parse_errors: u64,
    /// Storage, network and unclassified failures.
    pub io_errors: u64,
    /// Credential failures.
    pub auth_errors: u64,
}

impl SyncStats {
    /// Returns true if any counter is non-zero.
    pub fn has_errors(&self) -> bool {
        self.parse_errors + self.io_errors + self.auth_errors > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_routes_to_class_counter() {
        let counters = RunCounters::new();
        counters.record(&SyncError::ConstraintViolation("x".into()));
        counters.record(&SyncError::transport("reset"));
        counters.record(&SyncError::Unclassified("?".into()));
        counters.record(&SyncError::auth("bad"));
        counters.record(&SyncError::OperationCanceled);

        assert_eq!(
            counters.snapshot(),
            SyncStats {
                parse_errors: 1,
                io_errors: 2,
                auth_errors: 1,
            }
        );
    }

    #[test]
    fn canceled_is_not_an_error() {
        let counters = RunCounters::new();
        assert_eq!(
            counters.record(&SyncError::OperationCanceled),
            ErrorClass::Uncounted
        );
        assert!(!counters.snapshot().has_errors());
    }
}
