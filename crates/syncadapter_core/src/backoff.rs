//! Persisted backoff state.
//!
//! Two values survive process restarts: the earliest instant the next sync
//! may start, and whether the assigned cluster URL is known to be stale.
//! Each store operation is a single critical section; `extend` reads and
//! writes under the same lock acquisition.
//!
//! ```text
//! <dir>/
//! ├─ <scope>.backoff.json       # {"earliestNextSync": ..., "clusterUrlIsStale": ...}
//! └─ <scope>.backoff.json.tmp   # transient, during atomic writes
//! ```

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Snapshot of the persisted backoff values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffState {
    /// Milliseconds since the epoch; 0 when never set.
    pub earliest_next_sync: i64,
    /// Whether the client must re-resolve its node before syncing.
    pub cluster_url_is_stale: bool,
}

/// Storage for [`BackoffState`], scoped to one account.
pub trait BackoffStore: Send + Sync {
    /// Returns the earliest next sync time, or 0 if never set.
    fn earliest_next_sync(&self) -> i64;

    /// Overwrites the earliest next sync time.
    fn set_earliest_next_sync(&self, next: i64) -> SyncResult<()>;

    /// Moves the earliest next sync time forward to `next`.
    ///
    /// Returns `Ok(false)` without writing if the stored value is already at
    /// or beyond `next`.
    fn extend_earliest_next_sync(&self, next: i64) -> SyncResult<bool>;

    /// Returns whether the cluster URL is stale.
    fn cluster_url_is_stale(&self) -> bool;

    /// Sets the cluster URL staleness flag.
    fn set_cluster_url_is_stale(&self, stale: bool) -> SyncResult<()>;

    /// Resets both values to their defaults.
    fn purge(&self) -> SyncResult<()>;

    /// Returns both values.
    fn snapshot(&self) -> BackoffState;
}

/// Applies `f` to a copy of the state; returns the new state if `f` changed
/// anything.
fn apply<F>(state: &BackoffState, f: F) -> Option<BackoffState>
where
    F: FnOnce(&mut BackoffState) -> bool,
{
    let mut next = *state;
    f(&mut next).then_some(next)
}

fn extend_to(next: i64) -> impl FnOnce(&mut BackoffState) -> bool {
    move |state| {
        if state.earliest_next_sync >= next {
            return false;
        }
        state.earliest_next_sync = next;
        true
    }
}

/// An in-memory backoff store.
#[derive(Debug, Default)]
pub struct MemoryBackoffStore {
    state: Mutex<BackoffState>,
}

impl MemoryBackoffStore {
    /// Creates a store with default state.
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut BackoffState) -> bool,
    {
        let mut state = self.state.lock();
        match apply(&state, f) {
            Some(next) => {
                *state = next;
                true
            }
            None => false,
        }
    }
}

impl BackoffStore for MemoryBackoffStore {
    fn earliest_next_sync(&self) -> i64 {
        self.state.lock().earliest_next_sync
    }

    fn set_earliest_next_sync(&self, next: i64) -> SyncResult<()> {
        self.update(|s| {
            s.earliest_next_sync = next;
            true
        });
        Ok(())
    }

    fn extend_earliest_next_sync(&self, next: i64) -> SyncResult<bool> {
        Ok(self.update(extend_to(next)))
    }

    fn cluster_url_is_stale(&self) -> bool {
        self.state.lock().cluster_url_is_stale
    }

    fn set_cluster_url_is_stale(&self, stale: bool) -> SyncResult<()> {
        self.update(|s| {
            s.cluster_url_is_stale = stale;
            true
        });
        Ok(())
    }

    fn purge(&self) -> SyncResult<()> {
        *self.state.lock() = BackoffState::default();
        Ok(())
    }

    fn snapshot(&self) -> BackoffState {
        *self.state.lock()
    }
}

/// A backoff store persisted as a small JSON file.
///
/// Every mutation is written with the write-temp, fsync, rename pattern
/// before the call returns. The in-memory copy is only updated once the
/// write has succeeded.
#[derive(Debug)]
pub struct FileBackoffStore {
    path: PathBuf,
    state: Mutex<BackoffState>,
}

impl FileBackoffStore {
    /// Opens (or creates) the store for `scope` inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if `scope` is not a safe file name, the directory
    /// cannot be created, or an existing file cannot be parsed.
    pub fn open(dir: &Path, scope: &str) -> SyncResult<Self> {
        validate_scope(scope)?;
        fs::create_dir_all(dir)?;

        let path = dir.join(format!("{scope}.backoff.json"));
        let state = Self::load(&path)?;
        tracing::debug!(path = %path.display(), ?state, "opened backoff store");

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> SyncResult<BackoffState> {
        if !path.exists() {
            return Ok(BackoffState::default());
        }
        let data = fs::read(path)?;
        if data.is_empty() {
            return Ok(BackoffState::default());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    fn persist(&self, state: &BackoffState) -> SyncResult<()> {
        write_atomically(&self.path, &serde_json::to_vec(state)?)
    }

    fn update<F>(&self, f: F) -> SyncResult<bool>
    where
        F: FnOnce(&mut BackoffState) -> bool,
    {
        let mut state = self.state.lock();
        match apply(&state, f) {
            Some(next) => {
                self.persist(&next)?;
                *state = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl BackoffStore for FileBackoffStore {
    fn earliest_next_sync(&self) -> i64 {
        self.state.lock().earliest_next_sync
    }

    fn set_earliest_next_sync(&self, next: i64) -> SyncResult<()> {
        self.update(|s| {
            s.earliest_next_sync = next;
            true
        })
        .map(drop)
    }

    fn extend_earliest_next_sync(&self, next: i64) -> SyncResult<bool> {
        self.update(extend_to(next))
    }

    fn cluster_url_is_stale(&self) -> bool {
        self.state.lock().cluster_url_is_stale
    }

    fn set_cluster_url_is_stale(&self, stale: bool) -> SyncResult<()> {
        self.update(|s| {
            s.cluster_url_is_stale = stale;
            true
        })
        .map(drop)
    }

    fn purge(&self) -> SyncResult<()> {
        self.update(|s| {
            *s = BackoffState::default();
            true
        })
        .map(drop)
    }

    fn snapshot(&self) -> BackoffState {
        *self.state.lock()
    }
}

fn validate_scope(scope: &str) -> SyncResult<()> {
    let valid = !scope.is_empty()
        && !scope.starts_with('.')
        && scope
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(SyncError::Config(format!("invalid account scope: {scope:?}")))
    }
}

/// Writes `data` to `path` via a temporary sibling and an atomic rename.
pub(crate) fn write_atomically(path: &Path, data: &[u8]) -> SyncResult<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    // A leftover temp file (or a planted link) is removed, never followed.
    match fs::remove_file(&temp_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let mut file = create_private(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    sync_parent(path)
}

/// Creates a new file readable only by the owner.
#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> SyncResult<()> {
    // Directory fsync is not available; NTFS journals the rename.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_defaults() {
        let store = MemoryBackoffStore::new();
        assert_eq!(store.earliest_next_sync(), 0);
        assert!(!store.cluster_url_is_stale());
    }

    #[test]
    fn extend_only_moves_forward() {
        let store = MemoryBackoffStore::new();
        assert!(store.extend_earliest_next_sync(100).unwrap());
        assert!(!store.extend_earliest_next_sync(50).unwrap());
        assert!(!store.extend_earliest_next_sync(100).unwrap());
        assert_eq!(store.earliest_next_sync(), 100);
        assert!(store.extend_earliest_next_sync(101).unwrap());
        assert_eq!(store.earliest_next_sync(), 101);
    }

    #[test]
    fn set_overwrites_backwards() {
        let store = MemoryBackoffStore::new();
        store.set_earliest_next_sync(500).unwrap();
        store.set_earliest_next_sync(10).unwrap();
        assert_eq!(store.earliest_next_sync(), 10);
    }

    #[test]
    fn stale_flag_is_independent() {
        let store = MemoryBackoffStore::new();
        store.set_earliest_next_sync(7).unwrap();
        store.set_cluster_url_is_stale(true).unwrap();
        assert_eq!(
            store.snapshot(),
            BackoffState {
                earliest_next_sync: 7,
                cluster_url_is_stale: true,
            }
        );
        store.purge().unwrap();
        assert_eq!(store.snapshot(), BackoffState::default());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileBackoffStore::open(dir.path(), "sync.prefs.abc").unwrap();
            store.extend_earliest_next_sync(1_234).unwrap();
            store.set_cluster_url_is_stale(true).unwrap();
        }

        let store = FileBackoffStore::open(dir.path(), "sync.prefs.abc").unwrap();
        assert_eq!(store.earliest_next_sync(), 1_234);
        assert!(store.cluster_url_is_stale());
        assert!(store.path().ends_with("sync.prefs.abc.backoff.json"));
    }

    #[test]
    fn file_store_scopes_are_isolated() {
        let dir = tempdir().unwrap();
        let a = FileBackoffStore::open(dir.path(), "a").unwrap();
        let b = FileBackoffStore::open(dir.path(), "b").unwrap();
        a.set_earliest_next_sync(99).unwrap();
        assert_eq!(b.earliest_next_sync(), 0);
    }

    #[test]
    fn file_store_purge_persists() {
        let dir = tempdir().unwrap();
        let store = FileBackoffStore::open(dir.path(), "scope").unwrap();
        store.set_earliest_next_sync(5).unwrap();
        store.purge().unwrap();

        let reopened = FileBackoffStore::open(dir.path(), "scope").unwrap();
        assert_eq!(reopened.snapshot(), BackoffState::default());
    }

    #[test]
    fn file_store_treats_empty_file_as_default() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("scope.backoff.json"), b"").unwrap();
        let store = FileBackoffStore::open(dir.path(), "scope").unwrap();
        assert_eq!(store.snapshot(), BackoffState::default());
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("scope.backoff.json"), b"{not json").unwrap();
        let result = FileBackoffStore::open(dir.path(), "scope");
        assert!(matches!(result, Err(SyncError::Serialization(_))));
    }

    #[test]
    fn file_store_rejects_unsafe_scope() {
        let dir = tempdir().unwrap();
        for scope in ["", "../escape", ".hidden", "a/b"] {
            assert!(matches!(
                FileBackoffStore::open(dir.path(), scope),
                Err(SyncError::Config(_))
            ));
        }
    }

    #[test]
    fn file_store_skips_write_when_not_extended() {
        let dir = tempdir().unwrap();
        let store = FileBackoffStore::open(dir.path(), "scope").unwrap();
        assert!(!store.extend_earliest_next_sync(0).unwrap());
        assert!(!store.path().exists());
    }

    #[test]
    fn atomic_write_replaces_leftover_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(dir.path().join("state.json.tmp"), b"half written").unwrap();

        write_atomically(&path, b"{}").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomically(&path, b"{}").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0, "mode {mode:o}");
    }
}
