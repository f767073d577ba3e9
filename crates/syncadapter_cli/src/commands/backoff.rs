//! Backoff command implementation.

use super::{open_store, CommandError};
use std::path::Path;
use std::sync::Arc;
use syncadapter_core::{BackoffPolicy, BackoffStore, ControllerConfig, SystemClock};

/// Requests a fuzzed backoff of `millis` and returns the new window end.
pub fn apply(path: &Path, scope: &str, millis: i64) -> Result<i64, CommandError> {
    let store: Arc<dyn BackoffStore> = Arc::new(open_store(path, scope)?);
    let policy = BackoffPolicy::new(
        store.clone(),
        Arc::new(SystemClock),
        &ControllerConfig::new(path),
    );
    policy.request_backoff(millis);
    Ok(store.earliest_next_sync())
}

/// Runs the backoff command.
pub fn run(path: &Path, scope: &str, millis: i64) -> Result<(), CommandError> {
    let until = apply(path, scope, millis)?;
    println!("Earliest next sync for {scope}: {until}");
    Ok(())
}
