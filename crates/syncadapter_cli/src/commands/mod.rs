//! CLI command implementations.

pub mod backoff;
pub mod mark_stale;
pub mod purge;
pub mod show_account;
pub mod status;

use std::path::{Path, PathBuf};
use syncadapter_core::{FileBackoffStore, SyncError};
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CommandError {
    /// An output format other than `text` or `json`.
    #[error("unknown output format: {0} (expected text or json)")]
    UnknownFormat(String),

    /// No account pickle at the given path.
    #[error("no account pickle at {0}")]
    NoPickle(PathBuf),

    /// A controller-level failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// JSON rendering failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Output format shared by the inspection commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses `text` or `json`.
    pub fn parse(format: &str) -> Result<Self, CommandError> {
        match format {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(CommandError::UnknownFormat(other.to_string())),
        }
    }
}

/// Opens the backoff store for `scope` under `path`.
pub fn open_store(path: &Path, scope: &str) -> Result<FileBackoffStore, CommandError> {
    Ok(FileBackoffStore::open(path, scope)?)
}
