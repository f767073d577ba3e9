//! # Sync Adapter Repository
//!
//! The session contract a local data collection implements to take part in
//! incremental synchronization.
//!
//! This crate provides:
//! - [`RepositorySession`]: completion-based fetch/store/wipe inside an
//!   explicit `begin`/`finish` envelope
//! - [`Repository`]: a collection that opens sessions
//! - [`with_session`] and [`wait_for`] helpers for driving sessions from
//!   synchronous code
//! - [`InMemoryRepository`] for tests and ephemeral collections
//!
//! ## Key Invariants
//!
//! - Data operations are only valid between `begin` and `finish`
//! - Out-of-state calls complete with an error, never silently
//! - Every opened envelope is closed, by `finish` or `abort`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod record;
mod session;

pub use error::{RepositoryError, RepositoryResult};
pub use memory::{InMemoryRepository, InMemorySession};
pub use record::{Guid, Record};
pub use session::{
    completion, wait_for, with_session, Completion, Repository, RepositorySession, SessionState,
};
