//! Repository session contract.
//!
//! A [`RepositorySession`] is opened once per collection per sync run. Every
//! operation reports its outcome through a [`Completion`] instead of a return
//! value, so implementations are free to do their work on another thread.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted --begin--> Active --finish--> Finished
//!                          \
//!                           --abort--> Aborted
//! ```
//!
//! Reads, writes and wipes are only valid while `Active`. Calling them in any
//! other state completes with [`RepositoryError::InvalidSessionState`].

use crate::error::{RepositoryError, RepositoryResult};
use crate::record::{Guid, Record};
use std::sync::mpsc;

/// Completion receiver for an asynchronous repository operation.
///
/// Implementations must invoke it exactly once.
pub type Completion<T> = Box<dyn FnOnce(RepositoryResult<T>) + Send + 'static>;

/// Lifecycle state of a repository session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but `begin` has not succeeded yet.
    NotStarted,
    /// Inside the transactional envelope.
    Active,
    /// `finish` completed; pending work is durable.
    Finished,
    /// The session was abandoned; pending work was discarded.
    Aborted,
}

impl SessionState {
    /// Returns true if data operations are permitted.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    /// Returns true if the session can no longer be used.
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Aborted)
    }
}

/// Per-collection session used by the session engine during one sync run.
pub trait RepositorySession: Send {
    /// Returns the current lifecycle state.
    fn state(&self) -> SessionState;

    /// Produces the identifiers of records changed at or after `timestamp`.
    fn guids_since(&mut self, timestamp: i64, done: Completion<Vec<Guid>>);

    /// Produces every record changed at or after `timestamp`.
    ///
    /// Ordering is unspecified. Delivery is all-or-nothing: a failure part
    /// way through completes with an error, never with a truncated list.
    fn fetch_since(&mut self, timestamp: i64, done: Completion<Vec<Record>>);

    /// Produces the records among `guids` that still exist.
    ///
    /// Unknown identifiers are omitted rather than reported as errors.
    fn fetch(&mut self, guids: &[Guid], done: Completion<Vec<Record>>);

    /// Produces every record in the collection. Diagnostic use only.
    fn fetch_all(&mut self, done: Completion<Vec<Record>>);

    /// Inserts or replaces the record with the same GUID.
    fn store(&mut self, record: Record, done: Completion<Guid>);

    /// Deletes every record in the collection.
    fn wipe(&mut self, done: Completion<()>);

    /// Opens the transactional envelope. Must be called exactly once.
    fn begin(&mut self, done: Completion<()>);

    /// Closes the envelope, making pending work durable.
    ///
    /// On failure paths callers may close with [`abort`](Self::abort)
    /// instead; either call ends the session exactly once, and
    /// [`with_session`] always takes one of the two.
    fn finish(&mut self, done: Completion<()>);

    /// Abandons the session, discarding pending work and releasing resources.
    ///
    /// Has no effect unless the session is `Active`.
    fn abort(&mut self);
}

/// A local data collection that can open sessions.
pub trait Repository: Send + Sync {
    /// Name of the collection this repository adapts.
    fn collection(&self) -> &str;

    /// Opens a new session in the `NotStarted` state.
    fn create_session(&self) -> RepositoryResult<Box<dyn RepositorySession>>;
}

/// Wraps a closure as a [`Completion`].
pub fn completion<T, F>(f: F) -> Completion<T>
where
    F: FnOnce(RepositoryResult<T>) + Send + 'static,
{
    Box::new(f)
}

/// Runs a completion-based call and blocks until its result arrives.
///
/// Returns [`RepositoryError::NoResult`] if the session drops the completion
/// without invoking it.
pub fn wait_for<T, F>(call: F) -> RepositoryResult<T>
where
    T: Send + 'static,
    F: FnOnce(Completion<T>),
{
    let (tx, rx) = mpsc::sync_channel(1);
    call(completion(move |result| {
        // The waiter may already be gone if the caller panicked.
        let _ = tx.send(result);
    }));
    rx.recv().unwrap_or(Err(RepositoryError::NoResult))
}

/// Aborts an active session on drop unless it was finished.
struct SessionGuard {
    session: Box<dyn RepositorySession>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.session.state().is_active() {
            tracing::debug!("aborting repository session left active");
            self.session.abort();
        }
    }
}

/// Runs `f` inside a `begin`/`finish` envelope on a new session.
///
/// If `f` fails (or panics) the session is aborted instead of finished, so
/// cursors and locks are never carried past the call.
pub fn with_session<T, F>(repository: &dyn Repository, f: F) -> RepositoryResult<T>
where
    F: FnOnce(&mut dyn RepositorySession) -> RepositoryResult<T>,
{
    let mut guard = SessionGuard {
        session: repository.create_session()?,
    };
    wait_for(|done| guard.session.begin(done))?;

    let value = f(guard.session.as_mut())?;
    wait_for(|done| guard.session.finish(done))?;
    Ok(value)
}
