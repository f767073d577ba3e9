//! In-memory repository for tests and ephemeral collections.

use crate::error::{RepositoryError, RepositoryResult};
use crate::record::{Guid, Record};
use crate::session::{Completion, Repository, RepositorySession, SessionState};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    records: RwLock<BTreeMap<Guid, Record>>,
    active_sessions: AtomicUsize,
    unavailable: AtomicBool,
}

/// A repository holding one collection in memory.
///
/// Sessions buffer their writes (and a pending wipe) and apply them
/// atomically at `finish`. An aborted session leaves the committed records
/// untouched.
///
/// # Example
///
/// ```rust
/// use syncadapter_repository::{with_session, wait_for, InMemoryRepository, Record};
///
/// let repo = InMemoryRepository::new("bookmarks");
/// with_session(&repo, |session| {
///     wait_for(|done| session.store(Record::new("abc", "bookmarks", 1, vec![1]), done))
/// })
/// .unwrap();
/// assert_eq!(repo.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryRepository {
    collection: String,
    shared: Arc<Shared>,
}

impl InMemoryRepository {
    /// Creates an empty repository for `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Creates a repository pre-populated with `records`.
    pub fn with_records(collection: impl Into<String>, records: Vec<Record>) -> Self {
        let repo = Self::new(collection);
        {
            let mut committed = repo.shared.records.write();
            for record in records {
                committed.insert(record.guid.clone(), record);
            }
        }
        repo
    }

    /// Returns the number of committed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.records.read().len()
    }

    /// Returns true if no records are committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a committed record by GUID.
    #[must_use]
    pub fn get(&self, guid: &Guid) -> Option<Record> {
        self.shared.records.read().get(guid).cloned()
    }

    /// Returns the number of sessions currently inside `begin`/`finish`.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.shared.active_sessions.load(Ordering::SeqCst)
    }

    /// Simulates locked storage: while set, `begin` fails with
    /// [`RepositoryError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl Repository for InMemoryRepository {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn create_session(&self) -> RepositoryResult<Box<dyn RepositorySession>> {
        Ok(Box::new(InMemorySession {
            collection: self.collection.clone(),
            shared: Arc::clone(&self.shared),
            state: SessionState::NotStarted,
            pending: BTreeMap::new(),
            wipe_pending: false,
        }))
    }
}

/// Session over an [`InMemoryRepository`].
pub struct InMemorySession {
    collection: String,
    shared: Arc<Shared>,
    state: SessionState,
    pending: BTreeMap<Guid, Record>,
    wipe_pending: bool,
}

impl InMemorySession {
    fn ensure_active(&self, operation: &'static str) -> RepositoryResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(RepositoryError::invalid_state(self.state, operation))
        }
    }

    /// Looks a record up through the session's pending writes.
    fn lookup(&self, guid: &Guid) -> Option<Record> {
        if let Some(record) = self.pending.get(guid) {
            return Some(record.clone());
        }
        if self.wipe_pending {
            return None;
        }
        self.shared.records.read().get(guid).cloned()
    }

    /// Returns the records this session sees, ordered by GUID.
    fn visible(&self) -> Vec<Record> {
        let mut merged = if self.wipe_pending {
            BTreeMap::new()
        } else {
            self.shared.records.read().clone()
        };
        for (guid, record) in &self.pending {
            merged.insert(guid.clone(), record.clone());
        }
        merged.into_values().collect()
    }

    fn release(&mut self, state: SessionState) {
        self.state = state;
        self.pending.clear();
        self.wipe_pending = false;
        self.shared.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RepositorySession for InMemorySession {
    fn state(&self) -> SessionState {
        self.state
    }

    fn guids_since(&mut self, timestamp: i64, done: Completion<Vec<Guid>>) {
        let result = self.ensure_active("guids_since").map(|()| {
            self.visible()
                .into_iter()
                .filter(|r| r.modified_since(timestamp))
                .map(|r| r.guid)
                .collect()
        });
        done(result);
    }

    fn fetch_since(&mut self, timestamp: i64, done: Completion<Vec<Record>>) {
        let result = self.ensure_active("fetch_since").map(|()| {
            self.visible()
                .into_iter()
                .filter(|r| r.modified_since(timestamp))
                .collect()
        });
        done(result);
    }

    fn fetch(&mut self, guids: &[Guid], done: Completion<Vec<Record>>) {
        let result = self
            .ensure_active("fetch")
            .map(|()| {
                let mut seen = BTreeSet::new();
                guids
                    .iter()
                    .filter(|guid| seen.insert(*guid))
                    .filter_map(|guid| self.lookup(guid))
                    .collect()
            });
        done(result);
    }

    fn fetch_all(&mut self, done: Completion<Vec<Record>>) {
        let result = self.ensure_active("fetch_all").map(|()| self.visible());
        done(result);
    }

    fn store(&mut self, record: Record, done: Completion<Guid>) {
        if let Err(err) = self.ensure_active("store") {
            done(Err(err));
            return;
        }
        if record.guid.as_str().is_empty() {
            done(Err(RepositoryError::InvalidRecord {
                guid: String::new(),
                reason: "empty guid".into(),
            }));
            return;
        }
        if record.collection != self.collection {
            done(Err(RepositoryError::InvalidRecord {
                guid: record.guid.to_string(),
                reason: format!(
                    "belongs to collection {}, not {}",
                    record.collection, self.collection
                ),
            }));
            return;
        }

        let guid = record.guid.clone();
        self.pending.insert(guid.clone(), record);
        done(Ok(guid));
    }

    fn wipe(&mut self, done: Completion<()>) {
        let result = self.ensure_active("wipe").map(|()| {
            self.pending.clear();
            self.wipe_pending = true;
        });
        done(result);
    }

    fn begin(&mut self, done: Completion<()>) {
        if self.state != SessionState::NotStarted {
            done(Err(RepositoryError::invalid_state(self.state, "begin")));
            return;
        }
        if self.shared.unavailable.load(Ordering::SeqCst) {
            done(Err(RepositoryError::Unavailable(format!(
                "collection {} is locked",
                self.collection
            ))));
            return;
        }

        self.state = SessionState::Active;
        self.shared.active_sessions.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(collection = %self.collection, "repository session begun");
        done(Ok(()));
    }

    fn finish(&mut self, done: Completion<()>) {
        if let Err(err) = self.ensure_active("finish") {
            done(Err(err));
            return;
        }

        {
            let mut committed = self.shared.records.write();
            if self.wipe_pending {
                committed.clear();
            }
            for (guid, record) in std::mem::take(&mut self.pending) {
                committed.insert(guid, record);
            }
        }
        self.release(SessionState::Finished);
        tracing::trace!(collection = %self.collection, "repository session finished");
        done(Ok(()));
    }

    fn abort(&mut self) {
        if self.state.is_active() {
            tracing::debug!(
                collection = %self.collection,
                discarded = self.pending.len(),
                "repository session aborted"
            );
            self.release(SessionState::Aborted);
        }
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.abort();
    }
}
