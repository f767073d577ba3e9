//! Immediate sync requests.

use crate::account::Account;
use crate::error::SyncResult;
use crate::stage::Stage;
use parking_lot::Mutex;

/// A request for the host scheduler to run a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Account to sync.
    pub account: Account,
    /// Whether the user asked for this sync; manual runs ignore backoff.
    pub manual: bool,
    /// Stages to run, or `None` for all.
    pub stages: Option<Vec<Stage>>,
}

/// Hands sync requests to the host scheduler.
pub trait SyncRequester: Send + Sync {
    /// Queues `request`. Must return without waiting for the sync.
    fn request_sync(&self, request: SyncRequest);
}

/// A requester that collects requests in memory.
#[derive(Debug, Default)]
pub struct QueuedRequester {
    requests: Mutex<Vec<SyncRequest>>,
}

impl QueuedRequester {
    /// Creates an empty requester.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every queued request.
    pub fn drain(&self) -> Vec<SyncRequest> {
        std::mem::take(&mut *self.requests.lock())
    }
}

impl SyncRequester for QueuedRequester {
    fn request_sync(&self, request: SyncRequest) {
        self.requests.lock().push(request);
    }
}

/// Asks the host to sync `account` now, optionally limited to `stage_names`.
///
/// Returns `Ok(false)` without doing anything when `account` is `None`.
///
/// # Errors
///
/// Returns [`crate::SyncError::UnknownStage`] if a stage name is not
/// recognised; nothing is requested in that case.
pub fn request_immediate_sync(
    requester: &dyn SyncRequester,
    account: Option<&Account>,
    stage_names: Option<&[&str]>,
) -> SyncResult<bool> {
    let Some(account) = account else {
        tracing::warn!("not requesting immediate sync: no account");
        return Ok(false);
    };

    let stages = stage_names.map(Stage::parse_all).transpose()?;
    tracing::info!(account = %account.name, ?stages, "requesting immediate sync");
    requester.request_sync(SyncRequest {
        account: account.clone(),
        manual: true,
        stages,
    });
    Ok(true)
}
