//! Status command implementation.

use super::{open_store, CommandError, Format};
use serde::Serialize;
use std::path::Path;
use syncadapter_core::{BackoffStore, Clock, SystemClock};

/// Backoff status of one scope.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Prefs scope.
    pub scope: String,
    /// Earliest next sync in epoch milliseconds; 0 if never set.
    pub earliest_next_sync: i64,
    /// Milliseconds until a scheduled sync may run.
    pub remaining_ms: i64,
    /// Whether the node assignment is stale.
    pub cluster_url_is_stale: bool,
}

/// Builds the status report for `scope` at `now`.
pub fn report(path: &Path, scope: &str, now: i64) -> Result<StatusReport, CommandError> {
    let store = open_store(path, scope)?;
    let state = store.snapshot();
    let remaining_ms = if state.earliest_next_sync > 0 {
        (state.earliest_next_sync - now).max(0)
    } else {
        0
    };
    Ok(StatusReport {
        scope: scope.to_string(),
        earliest_next_sync: state.earliest_next_sync,
        remaining_ms,
        cluster_url_is_stale: state.cluster_url_is_stale,
    })
}

/// Runs the status command.
pub fn run(path: &Path, scope: &str, format: &str) -> Result<(), CommandError> {
    let format = Format::parse(format)?;
    let report = report(path, scope, SystemClock.now_millis())?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            println!("Scope:              {}", report.scope);
            if report.earliest_next_sync == 0 {
                println!("Earliest next sync: never set");
            } else {
                println!("Earliest next sync: {}", report.earliest_next_sync);
            }
            if report.remaining_ms > 0 {
                println!("Backoff remaining:  {:.1}s", report.remaining_ms as f64 / 1000.0);
            } else {
                println!("Backoff remaining:  none");
            }
            println!("Node stale:         {}", report.cluster_url_is_stale);
        }
    }
    Ok(())
}
