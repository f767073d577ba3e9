//! Purge command implementation.

use super::{open_store, CommandError};
use std::path::Path;
use syncadapter_core::BackoffStore;

/// Runs the purge command.
pub fn run(path: &Path, scope: &str) -> Result<(), CommandError> {
    let store = open_store(path, scope)?;
    let before = store.snapshot();
    store.purge()?;
    tracing::info!(scope, ?before, "purged backoff state");
    println!("Purged backoff state for {scope}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncadapter_core::{BackoffState, FileBackoffStore};
    use tempfile::tempdir;

    #[test]
    fn resets_state() {
        let dir = tempdir().unwrap();
        {
            let store = FileBackoffStore::open(dir.path(), "scope").unwrap();
            store.set_earliest_next_sync(42).unwrap();
            store.set_cluster_url_is_stale(true).unwrap();
        }
        run(dir.path(), "scope").unwrap();
        let store = FileBackoffStore::open(dir.path(), "scope").unwrap();
        assert_eq!(store.snapshot(), BackoffState::default());
    }
}
