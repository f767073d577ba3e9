//! Sync stages.

use crate::error::SyncError;
use std::fmt;
use std::str::FromStr;

/// One unit of work within a sync run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Not started.
    Idle,
    /// Check local preconditions.
    CheckPreconditions,
    /// Make sure the node assignment is known.
    EnsureClusterUrl,
    /// Fetch collection timestamps.
    FetchInfoCollections,
    /// Fetch the global metadata record.
    FetchMetaGlobal,
    /// Make sure collection keys are available.
    EnsureKeys,
    /// Sync the clients collection.
    SyncClients,
    /// Sync open tabs.
    SyncTabs,
    /// Sync passwords.
    SyncPasswords,
    /// Sync bookmarks.
    SyncBookmarks,
    /// Sync history.
    SyncHistory,
    /// Sync form history.
    SyncFormHistory,
    /// Upload the global metadata record.
    UploadMetaGlobal,
    /// Finished.
    Completed,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 14] = [
        Stage::Idle,
        Stage::CheckPreconditions,
        Stage::EnsureClusterUrl,
        Stage::FetchInfoCollections,
        Stage::FetchMetaGlobal,
        Stage::EnsureKeys,
        Stage::SyncClients,
        Stage::SyncTabs,
        Stage::SyncPasswords,
        Stage::SyncBookmarks,
        Stage::SyncHistory,
        Stage::SyncFormHistory,
        Stage::UploadMetaGlobal,
        Stage::Completed,
    ];

    /// Returns the stage name.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::CheckPreconditions => "checkPreconditions",
            Stage::EnsureClusterUrl => "ensureClusterURL",
            Stage::FetchInfoCollections => "fetchInfoCollections",
            Stage::FetchMetaGlobal => "fetchMetaGlobal",
            Stage::EnsureKeys => "ensureKeysStage",
            Stage::SyncClients => "syncClientsEngine",
            Stage::SyncTabs => "syncTabs",
            Stage::SyncPasswords => "syncPasswords",
            Stage::SyncBookmarks => "syncBookmarks",
            Stage::SyncHistory => "syncHistory",
            Stage::SyncFormHistory => "syncFormHistory",
            Stage::UploadMetaGlobal => "uploadMetaGlobal",
            Stage::Completed => "completed",
        }
    }

    /// Returns the collection this stage syncs, if any.
    pub fn collection(self) -> Option<&'static str> {
        match self {
            Stage::SyncClients => Some("clients"),
            Stage::SyncTabs => Some("tabs"),
            Stage::SyncPasswords => Some("passwords"),
            Stage::SyncBookmarks => Some("bookmarks"),
            Stage::SyncHistory => Some("history"),
            Stage::SyncFormHistory => Some("forms"),
            _ => None,
        }
    }

    /// Parses a list of stage or collection names.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownStage`] for the first name that matches
    /// no stage.
    pub fn parse_all(names: &[&str]) -> Result<Vec<Stage>, SyncError> {
        names.iter().map(|name| name.parse()).collect()
    }
}

impl FromStr for Stage {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.name() == s || stage.collection() == Some(s))
            .ok_or_else(|| SyncError::UnknownStage(s.to_string()))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
