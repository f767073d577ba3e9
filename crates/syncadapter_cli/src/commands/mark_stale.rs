//! Mark-stale command implementation.

use super::{open_store, CommandError};
use std::path::Path;
use syncadapter_core::BackoffStore;

/// Runs the mark-stale command.
pub fn run(path: &Path, scope: &str, stale: bool) -> Result<(), CommandError> {
    let store = open_store(path, scope)?;
    store.set_cluster_url_is_stale(stale)?;
    tracing::info!(scope, stale, "updated node staleness");
    println!("Node stale for {scope}: {stale}");
    Ok(())
}
